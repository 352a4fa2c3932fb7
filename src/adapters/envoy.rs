//! Envoy ext_authz Adapter.
//!
//! Implements the Envoy External Authorization v3 gRPC service using the
//! pre-generated protobuf types from the `envoy-types` crate, so this
//! adapter needs no `build.rs`/`protoc` step. The paths below follow the
//! package structure of `envoy.service.auth.v3` as published upstream.

use crate::engine::BanEngine;
use crate::error::AdapterError;
use envoy_types::pb::envoy::service::auth::v3::{
    authorization_server::{Authorization, AuthorizationServer},
    CheckRequest, CheckResponse,
};
use envoy_types::pb::google::rpc::Status as RpcStatus;
use std::net::SocketAddr;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, info, warn};

/// gRPC status code for an allowed request.
const CODE_OK: i32 = 0;
/// gRPC status code for a denied request (`PERMISSION_DENIED`).
const CODE_PERMISSION_DENIED: i32 = 7;

pub struct EnvoyAdapter {
    engine: BanEngine,
}

impl EnvoyAdapter {
    pub fn new(engine: BanEngine) -> Self {
        Self { engine }
    }

    /// Extract the subject address from a `CheckRequest`, preferring
    /// `x-forwarded-for`, then `x-real-ip`, then the source address,
    /// then the destination address.
    fn extract_address(request: &CheckRequest) -> Option<String> {
        let attrs = request.attributes.as_ref()?;
        let headers = &attrs.request.as_ref()?.http.as_ref()?.headers;

        if let Some(xff) = headers.get("x-forwarded-for") {
            if let Some(first) = xff.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        if let Some(real_ip) = headers.get("x-real-ip") {
            if !real_ip.trim().is_empty() {
                return Some(real_ip.trim().to_string());
            }
        }
        if let Some(addr) = attrs
            .source
            .as_ref()
            .and_then(|p| p.address.as_ref())
            .and_then(|a| a.address.as_ref())
            .and_then(socket_address_text)
        {
            return Some(addr);
        }
        if let Some(addr) = attrs
            .destination
            .as_ref()
            .and_then(|p| p.address.as_ref())
            .and_then(|a| a.address.as_ref())
            .and_then(socket_address_text)
        {
            return Some(addr);
        }
        None
    }
}

fn socket_address_text(
    address: &envoy_types::pb::envoy::config::core::v3::address::Address,
) -> Option<String> {
    match address {
        envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(socket) => {
            Some(socket.address.clone())
        }
        _ => None,
    }
}

#[tonic::async_trait]
impl Authorization for EnvoyAdapter {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let check_request = request.into_inner();
        let Some(addr) = Self::extract_address(&check_request) else {
            debug!("ext_authz request carried no extractable address, allowing");
            return Ok(Response::new(allow_response()));
        };

        let banned = match self.engine.is_banned(&addr).await {
            Ok(banned) => banned,
            Err(e) => {
                let err: AdapterError = e.into();
                warn!(%addr, code = err.error_code(), error = %err, "is_banned lookup failed, failing open");
                false
            }
        };
        if banned {
            info!(%addr, "ext_authz denying banned address");
            Ok(Response::new(deny_response()))
        } else {
            Ok(Response::new(allow_response()))
        }
    }
}

fn allow_response() -> CheckResponse {
    CheckResponse {
        status: Some(RpcStatus {
            code: CODE_OK,
            message: String::new(),
            details: Vec::new(),
        }),
        http_response: None,
        dynamic_metadata: None,
    }
}

fn deny_response() -> CheckResponse {
    CheckResponse {
        status: Some(RpcStatus {
            code: CODE_PERMISSION_DENIED,
            message: "IP is banned due to suspicious activity".to_string(),
            details: Vec::new(),
        }),
        http_response: None,
        dynamic_metadata: None,
    }
}

/// Serve the ext_authz service until `shutdown_rx` fires.
pub async fn serve(
    addr: SocketAddr,
    engine: BanEngine,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, "Envoy ext_authz adapter listening");
    let adapter = EnvoyAdapter::new(engine);
    Server::builder()
        .add_service(AuthorizationServer::new(adapter))
        .serve_with_shutdown(addr, async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanConfig;
    use crate::db::Database;
    use std::collections::HashMap;

    async fn engine() -> BanEngine {
        let db = Database::new(":memory:").await.unwrap();
        BanEngine::new(db, BanConfig::default())
    }

    fn request_with_headers(headers: HashMap<String, String>) -> CheckRequest {
        use envoy_types::pb::envoy::service::auth::v3::{AttributeContext, attribute_context};

        CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(attribute_context::Request {
                    http: Some(attribute_context::HttpRequest {
                        headers,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn malformed_request_without_address_allows() {
        let engine = engine().await;
        let request = request_with_headers(HashMap::new());
        let adapter = EnvoyAdapter::new(engine);
        let response = adapter
            .check(Request::new(request))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status.unwrap().code, CODE_OK);
    }

    #[tokio::test]
    async fn banned_address_via_x_real_ip_is_denied() {
        let engine = engine().await;
        engine
            .manual_ban("192.168.1.200", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let mut headers = HashMap::new();
        headers.insert("x-real-ip".to_string(), "192.168.1.200".to_string());
        let request = request_with_headers(headers);
        let adapter = EnvoyAdapter::new(engine);
        let response = adapter
            .check(Request::new(request))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status.unwrap().code, CODE_PERMISSION_DENIED);
    }

    #[tokio::test]
    async fn x_forwarded_for_takes_first_element() {
        let engine = engine().await;
        engine
            .manual_ban("203.0.113.9", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let mut headers = HashMap::new();
        headers.insert(
            "x-forwarded-for".to_string(),
            "203.0.113.9, 10.0.0.1".to_string(),
        );
        let request = request_with_headers(headers);
        let adapter = EnvoyAdapter::new(engine);
        let response = adapter
            .check(Request::new(request))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status.unwrap().code, CODE_PERMISSION_DENIED);
    }
}
