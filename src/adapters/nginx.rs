//! Nginx auth_request Adapter, plus the admin HTTP API.
//!
//! The admin API is mounted on the same axum `Router` as the nginx
//! adapter under an `/api` prefix, since this adapter already owns an
//! HTTP listener and stands up its own `Router`.

use crate::engine::BanEngine;
use crate::error::AdapterError;
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NginxAdapter {
    engine: BanEngine,
    return_json: bool,
}

impl NginxAdapter {
    pub fn new(engine: BanEngine, return_json: bool) -> Self {
        Self { engine, return_json }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/auth", any(auth_handler))
            .route("/health", get(health_handler))
            .route("/api/ban", post(ban_handler))
            .route("/api/unban", post(unban_handler))
            .route("/api/temp-bans", get(temp_bans_handler))
            .route("/api/purge-bans", post(purge_bans_handler))
            .route("/api/radix-stats", get(radix_stats_handler))
            .route(
                "/api/whitelist",
                get(list_whitelist_handler)
                    .post(add_whitelist_handler)
                    .delete(remove_whitelist_handler),
            )
            .route("/api/blacklist", get(list_blacklist_handler))
            .with_state(self)
    }
}

/// Bind and serve the combined nginx + admin router until `shutdown_rx`
/// fires, giving in-flight requests up to 5s to finish.
pub async fn serve(
    addr: SocketAddr,
    adapter: NginxAdapter,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> std::io::Result<()> {
    info!(%addr, "Nginx auth_request adapter listening");
    let listener = TcpListener::bind(addr).await?;
    let app = adapter.router();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await
}

fn extract_address(headers: &HeaderMap, remote: SocketAddr) -> (Option<String>, String) {
    let order = [
        "x-original-ip",
        "x-forwarded-for",
        "x-real-ip",
        "x-client-ip",
        "cf-connecting-ip",
    ];
    for name in order {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let candidate = if name == "x-forwarded-for" {
                value.split(',').next().unwrap_or(value).trim()
            } else {
                value.trim()
            };
            if let Some(addr) = crate::engine::address::parse_address(candidate) {
                return (Some(crate::engine::address::canonical(&addr)), remote.ip().to_string());
            }
        }
    }
    let remote_text = remote.ip().to_string();
    (None, remote_text)
}

async fn auth_handler(
    State(adapter): State<NginxAdapter>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let (addr, transport_addr) = extract_address(&headers, remote);

    let Some(addr) = addr else {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        let h = response.headers_mut();
        h.insert("X-Fail2ban-Status", HeaderValue::from_static("allowed"));
        if let Ok(v) = HeaderValue::from_str(&transport_addr) {
            h.insert("X-Fail2ban-IP", v);
        }
        h.insert(
            "X-Fail2ban-Service",
            HeaderValue::from_static("fail2ban-nginx-auth"),
        );
        return response;
    };

    let banned = match adapter.engine.is_banned(&addr).await {
        Ok(banned) => banned,
        Err(e) => {
            let err: AdapterError = e.into();
            warn!(%addr, code = err.error_code(), error = %err, "is_banned lookup failed, failing open");
            false
        }
    };

    let mut response = Response::new(Body::empty());
    let h = response.headers_mut();
    h.insert(
        "X-Fail2ban-Service",
        HeaderValue::from_static("fail2ban-nginx-auth"),
    );
    if let Ok(v) = HeaderValue::from_str(&addr) {
        h.insert("X-Fail2ban-IP", v);
    }

    if banned {
        *response.status_mut() = StatusCode::FORBIDDEN;
        h.insert("X-Fail2ban-Status", HeaderValue::from_static("denied"));
        let reason = "banned due to repeated violations";
        if let Ok(v) = HeaderValue::from_str(reason) {
            h.insert("X-Fail2ban-Reason", v);
        }
        if adapter.return_json {
            h.insert(
                "Content-Type",
                HeaderValue::from_static("application/json"),
            );
            let body = serde_json::json!({
                "error": "access_denied",
                "reason": reason,
                "ip": addr,
            });
            *response.body_mut() = Body::from(body.to_string());
        }
    } else {
        *response.status_mut() = StatusCode::OK;
        h.insert("X-Fail2ban-Status", HeaderValue::from_static("allowed"));
    }

    response
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fail2ban-nginx-auth",
    }))
}

#[derive(Debug, Deserialize)]
struct BanRequest {
    ip_address: String,
    permanent: Option<bool>,
    duration: Option<u64>,
    reason: Option<String>,
    created_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn ban_handler(
    State(adapter): State<NginxAdapter>,
    Json(req): Json<BanRequest>,
) -> impl IntoResponse {
    if req.permanent.unwrap_or(false) {
        match adapter
            .engine
            .db()
            .blacklist()
            .add(&req.ip_address, req.reason.as_deref(), req.created_by.as_deref())
            .await
        {
            Ok(()) => (
                StatusCode::OK,
                Json(ApiResponse {
                    success: true,
                    message: None,
                }),
            ),
            Err(e) => (
                StatusCode::CONFLICT,
                Json(ApiResponse {
                    success: false,
                    message: Some(e.to_string()),
                }),
            ),
        }
    } else {
        let duration = req
            .duration
            .map(Duration::from_secs)
            .unwrap_or(adapter.engine.config().initial_ban_time);
        match adapter.engine.manual_ban(&req.ip_address, duration).await {
            Ok(()) => (
                StatusCode::OK,
                Json(ApiResponse {
                    success: true,
                    message: None,
                }),
            ),
            Err(e) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse {
                    success: false,
                    message: Some(e.to_string()),
                }),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnbanRequest {
    ip_address: String,
    #[allow(dead_code)]
    reason: Option<String>,
}

async fn unban_handler(
    State(adapter): State<NginxAdapter>,
    Json(req): Json<UnbanRequest>,
) -> impl IntoResponse {
    match adapter.engine.manual_unban(&req.ip_address).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: Some(e.to_string()),
            }),
        ),
    }
}

async fn temp_bans_handler(State(adapter): State<NginxAdapter>) -> impl IntoResponse {
    let banned = adapter.engine.list_currently_banned();
    let items: Vec<serde_json::Value> = banned
        .into_iter()
        .map(|(addr, expiry)| {
            let expiry_secs = expiry
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            serde_json::json!({ "ip_address": addr, "ban_expiry": expiry_secs })
        })
        .collect();
    Json(serde_json::json!({ "success": true, "count": items.len(), "items": items }))
}

async fn purge_bans_handler(State(adapter): State<NginxAdapter>) -> impl IntoResponse {
    let count = adapter.engine.purge_all_temporary_bans();
    Json(serde_json::json!({ "success": true, "count": count }))
}

async fn radix_stats_handler(State(adapter): State<NginxAdapter>) -> impl IntoResponse {
    let stats = adapter.engine.radix_stats();
    Json(serde_json::json!({ "success": true, "stats": stats }))
}

#[derive(Debug, Deserialize)]
struct ListRequest {
    ip_address: String,
    reason: Option<String>,
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    ip_address: Option<String>,
}

async fn add_whitelist_handler(
    State(adapter): State<NginxAdapter>,
    Json(req): Json<ListRequest>,
) -> impl IntoResponse {
    match adapter
        .engine
        .db()
        .whitelist()
        .add(&req.ip_address, req.reason.as_deref(), req.created_by.as_deref())
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ApiResponse {
                success: false,
                message: Some(e.to_string()),
            }),
        ),
    }
}

async fn remove_whitelist_handler(
    State(adapter): State<NginxAdapter>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let Some(ip_address) = query.ip_address else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: Some("ip_address query parameter required".to_string()),
            }),
        );
    };
    match adapter.engine.db().whitelist().remove(&ip_address).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: removed,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                success: false,
                message: Some(e.to_string()),
            }),
        ),
    }
}

async fn list_whitelist_handler(State(adapter): State<NginxAdapter>) -> impl IntoResponse {
    list_entries(&adapter.engine.db().whitelist()).await
}

async fn list_blacklist_handler(State(adapter): State<NginxAdapter>) -> impl IntoResponse {
    list_entries(&adapter.engine.db().blacklist()).await
}

async fn list_entries(repo: &crate::db::ListRepository<'_>) -> impl IntoResponse {
    match repo.list_enabled().await {
        Ok(entries) => {
            let items: Vec<serde_json::Value> = entries
                .into_iter()
                .map(|e| {
                    serde_json::json!({
                        "ip_address": e.ip_address,
                        "reason": e.reason,
                        "created_at": e.created_at,
                        "created_by": e.created_by,
                    })
                })
                .collect();
            Json(serde_json::json!({ "success": true, "count": items.len(), "items": items }))
        }
        Err(e) => Json(serde_json::json!({ "success": false, "message": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanConfig;
    use crate::db::Database;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_engine() -> BanEngine {
        let db = Database::new(":memory:").await.unwrap();
        BanEngine::new(db, BanConfig::default())
    }

    #[tokio::test]
    async fn health_route_returns_service_name() {
        let engine = test_engine().await;
        let adapter = NginxAdapter::new(engine, false);
        let app = adapter.router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_denies_banned_address_via_x_real_ip() {
        let engine = test_engine().await;
        engine
            .manual_ban("192.168.1.200", Duration::from_secs(60))
            .await
            .unwrap();
        let adapter = NginxAdapter::new(engine, false);
        let app = adapter.router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth")
                    .header("X-Real-IP", "192.168.1.200")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get("X-Fail2ban-Status").unwrap(),
            "denied"
        );
    }

    #[tokio::test]
    async fn auth_allows_unknown_address() {
        let engine = test_engine().await;
        let adapter = NginxAdapter::new(engine, false);
        let app = adapter.router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth")
                    .header("X-Real-IP", "10.0.0.99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
