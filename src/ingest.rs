//! Log Ingestor: reads datagrams from a UDP socket and feeds each one,
//! as a single log line, through the Pattern Matcher and into the Ban
//! Engine.

use crate::engine::BanEngine;
use crate::patterns::PatternMatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Maximum datagram size accepted: 4 KiB, which also bounds how
/// pathological a single regex evaluation over one line can get.
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Per-recv read deadline, so the task can observe cancellation even
/// under total silence on the wire.
const READ_DEADLINE: Duration = Duration::from_secs(1);

pub struct LogIngestor {
    socket: UdpSocket,
    engine: BanEngine,
    matcher: Arc<PatternMatcher>,
}

impl LogIngestor {
    pub async fn bind(
        addr: SocketAddr,
        engine: BanEngine,
        matcher: Arc<PatternMatcher>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, "log ingestor listening");
        Ok(Self {
            socket,
            engine,
            matcher,
        })
    }

    /// Run the receive loop until `shutdown_rx` fires. A datagram read
    /// timeout is expected and silent; cancellation during a timeout
    /// wait exits the loop without dropping an in-flight datagram,
    /// since none is ever partially decoded (UDP is message-oriented).
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                result = tokio::time::timeout(READ_DEADLINE, self.socket.recv_from(&mut buf)) => {
                    match result {
                        Ok(Ok((len, peer))) => {
                            let line = String::from_utf8_lossy(&buf[..len]).into_owned();
                            self.process_line(&line, peer).await;
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "log ingestor socket read failed");
                        }
                        Err(_) => {
                            // Read deadline elapsed with nothing received; expected.
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("log ingestor shutting down");
                    break;
                }
            }
        }
    }

    async fn process_line(&self, line: &str, peer: SocketAddr) {
        let violations = self.matcher.extract(line, SystemTime::now());
        if violations.is_empty() {
            return;
        }
        for extracted in violations {
            if let Err(e) = self
                .engine
                .record_violation(
                    &extracted.address,
                    extracted.violation.severity,
                    extracted.violation.description,
                )
                .await
            {
                warn!(source = %peer, error = %e, "failed to record violation");
            }
        }
    }
}
