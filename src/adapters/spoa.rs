//! HAProxy SPOA Adapter.
//!
//! This implements a simplified line-based dialect, not binary HAProxy
//! SPOP framing — an integrator targeting real HAProxy deployments over
//! the SPOP wire protocol would need a different transport here.

use crate::engine::BanEngine;
use crate::error::AdapterError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, instrument, warn};

pub struct SpoaAdapter {
    listener: TcpListener,
    engine: BanEngine,
    read_timeout: Duration,
    max_clients: usize,
}

impl SpoaAdapter {
    pub async fn bind(
        addr: SocketAddr,
        engine: BanEngine,
        read_timeout: Duration,
        max_clients: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "SPOA adapter listening");
        Ok(Self {
            listener,
            engine,
            read_timeout,
            max_clients,
        })
    }

    #[instrument(skip(self, shutdown_rx), name = "spoa")]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let permits = Arc::new(Semaphore::new(self.max_clients));
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let Ok(permit) = permits.clone().try_acquire_owned() else {
                                warn!(%addr, "SPOA max_clients reached, dropping connection");
                                continue;
                            };
                            let engine = self.engine.clone();
                            let read_timeout = self.read_timeout;
                            let mut client_shutdown = shutdown_rx.resubscribe();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, addr, engine, read_timeout, &mut client_shutdown).await {
                                    debug!(%addr, error = %e, "SPOA connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept SPOA connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("SPOA adapter shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: BanEngine,
    read_timeout: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read_result = tokio::select! {
            result = tokio::time::timeout(read_timeout, reader.read_line(&mut line)) => result,
            _ = shutdown_rx.recv() => {
                debug!(%addr, "SPOA connection stopped by shutdown");
                return Ok(());
            }
        };

        let bytes_read = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(%addr, "SPOA connection read timed out");
                return Ok(());
            }
        };
        if bytes_read == 0 {
            return Ok(());
        }

        if let Some(reply) = handle_line(line.trim_end(), &engine).await {
            write_half.write_all(reply.as_bytes()).await?;
        }
    }
}

/// Process one line: tokens split on whitespace; `haproxy_processing`
/// replies with the ban flag, `notify` is consumed silently, anything
/// else gets no reply, and blank lines are skipped.
async fn handle_line(line: &str, engine: &BanEngine) -> Option<String> {
    if line.is_empty() {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let command = tokens.next()?;

    match command {
        "haproxy_processing" => {
            let addr = tokens.find_map(|t| t.strip_prefix("src="));
            let banned = match addr {
                Some(addr) => match engine.is_banned(addr).await {
                    Ok(banned) => banned,
                    Err(e) => {
                        let err: AdapterError = e.into();
                        warn!(addr, code = err.error_code(), error = %err, "is_banned lookup failed, failing open");
                        false
                    }
                },
                None => false,
            };
            Some(if banned { "banned=1\n".to_string() } else { "banned=0\n".to_string() })
        }
        "notify" => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanConfig;
    use crate::db::Database;

    async fn engine() -> BanEngine {
        let db = Database::new(":memory:").await.unwrap();
        BanEngine::new(db, BanConfig::default())
    }

    #[tokio::test]
    async fn haproxy_processing_with_src_reports_unbanned() {
        let engine = engine().await;
        let reply = handle_line("haproxy_processing src=10.0.0.99", &engine).await;
        assert_eq!(reply, Some("banned=0\n".to_string()));
    }

    #[tokio::test]
    async fn haproxy_processing_without_src_reports_unbanned() {
        let engine = engine().await;
        let reply = handle_line("haproxy_processing other=x", &engine).await;
        assert_eq!(reply, Some("banned=0\n".to_string()));
    }

    #[tokio::test]
    async fn notify_is_silently_consumed() {
        let engine = engine().await;
        assert_eq!(handle_line("notify event=x", &engine).await, None);
    }

    #[tokio::test]
    async fn blank_line_has_no_reply() {
        let engine = engine().await;
        assert_eq!(handle_line("", &engine).await, None);
    }

    #[tokio::test]
    async fn banned_address_reports_banned_flag() {
        let engine = engine().await;
        engine
            .manual_ban("192.168.1.200", Duration::from_secs(60))
            .await
            .unwrap();
        let reply = handle_line("haproxy_processing src=192.168.1.200", &engine).await;
        assert_eq!(reply, Some("banned=1\n".to_string()));
    }
}
