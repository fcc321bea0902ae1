//! API Routes
//!
//! Registry endpoints plus health and metrics.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api::{Metrics, RateLimiter};
use crate::config::DiscoveryConfig;
use crate::crypto;
use crate::registry::{Registry, RegistryError};
use crate::types::{PeerSummary, RegisterRequest, UnregisterRequest};

/// Header carrying the original client address behind a proxy
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared API state
pub struct ApiState {
    pub config: Arc<DiscoveryConfig>,
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: Arc<RwLock<RateLimiter>>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::Auth(_) => StatusCode::UNAUTHORIZED,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, &self.to_string())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Build the router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        // Registry
        .route("/peers", get(list_peers))
        .route("/peers/", get(missing_public_key))
        .route("/peers/register", post(register_peer))
        .route("/peers/unregister", post(unregister_peer))
        .route("/peers/:public_key", get(get_peer))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until shutdown is signalled
pub async fn run_api_server(
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = state.config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("📡 HTTP API listening on {}", listener.local_addr()?);

    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;

    info!("📡 HTTP API stopped");
    Ok(())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
}

/// Resolve the caller's address: first `X-Forwarded-For` entry, else the
/// transport peer address
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<IpAddr> {
    forwarded_ip(headers).or_else(|| remote.map(|addr| addr.ip().to_canonical()))
}

/// Address the write rate limit is keyed on.
///
/// `X-Forwarded-For` is client controlled, so it only counts when the
/// connection comes from a trusted proxy. Without a transport address there
/// is nothing to key on.
pub fn rate_limit_ip(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let ip = remote?.ip().to_canonical();
    if trusted_proxies.iter().any(|proxy| proxy.to_canonical() == ip) {
        forwarded_ip(headers).or(Some(ip))
    } else {
        Some(ip)
    }
}

fn remote_addr(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| addr)
}

/// Apply the write rate limit; `Some` holds the rejection
async fn enforce_rate_limit(state: &ApiState, ip: Option<IpAddr>) -> Option<Response> {
    let ip = ip?;
    let allowed = state.rate_limiter.write().await.check(ip);
    if allowed {
        return None;
    }

    state.metrics.inc_rate_limited();
    debug!("Rate limited: {}", ip);
    Some(error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited"))
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> Response {
    match state.registry.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.metrics.uptime_secs(),
            "peers": {
                "total": stats.total_peers,
                "online": stats.online_peers,
            },
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn refresh_gauges(state: &ApiState) {
    if let Ok(stats) = state.registry.stats().await {
        state
            .metrics
            .set_peer_counts(stats.total_peers, stats.online_peers);
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;
    Json(state.metrics.to_json())
}

/// GET /peers - Ranked peers for the caller
async fn list_peers(
    State(state): State<Arc<ApiState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let Some(ip) = client_ip(&headers, remote_addr(connect_info)) else {
        state.metrics.record_list(0);
        return Json(Vec::<PeerSummary>::new()).into_response();
    };

    match state.registry.list_peers(ip).await {
        Ok(ranked) => {
            let peers: Vec<PeerSummary> = ranked.iter().map(|r| r.summary()).collect();
            state.metrics.record_list(peers.len());
            info!("Handled peers request from {} | {} peers returned", ip, peers.len());
            Json(peers).into_response()
        }
        Err(RegistryError::NotFound(_)) => {
            debug!("Peers request from unregistered address {}", ip);
            state.metrics.record_list(0);
            Json(Vec::<PeerSummary>::new()).into_response()
        }
        Err(e) => {
            warn!("Peers request from {} failed: {}", ip, e);
            e.into_response()
        }
    }
}

/// GET /peers/ - no key given
async fn missing_public_key() -> Response {
    error_response(StatusCode::BAD_REQUEST, "missing public key")
}

/// GET /peers/:public_key - A single peer
async fn get_peer(
    State(state): State<Arc<ApiState>>,
    Path(public_key): Path<String>,
) -> Response {
    let key = match crypto::parse_public_key(&public_key) {
        Ok(key) => key,
        Err(e) => return RegistryError::from(e).into_response(),
    };

    match state.registry.get_peer(&key).await {
        Ok(peer) => Json(peer).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /peers/register - Register or refresh a peer
async fn register_peer(
    State(state): State<Arc<ApiState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let ip = rate_limit_ip(
        &headers,
        remote_addr(connect_info),
        &state.config.trusted_proxies,
    );
    if let Some(rejection) = enforce_rate_limit(&state, ip).await {
        return rejection;
    }

    match state.registry.register(request).await {
        Ok(outcome) => {
            state.metrics.inc_registrations_accepted();
            let status = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(outcome.peer)).into_response()
        }
        Err(e) => {
            state.metrics.inc_registrations_rejected();
            warn!("Registration from {:?} rejected: {}", ip, e);
            e.into_response()
        }
    }
}

/// POST /peers/unregister - Remove a peer
async fn unregister_peer(
    State(state): State<Arc<ApiState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<UnregisterRequest>,
) -> Response {
    let ip = rate_limit_ip(
        &headers,
        remote_addr(connect_info),
        &state.config.trusted_proxies,
    );
    if let Some(rejection) = enforce_rate_limit(&state, ip).await {
        return rejection;
    }

    match state.registry.unregister(request).await {
        Ok(peer) => {
            state.metrics.inc_unregistrations();
            Json(serde_json::json!({
                "removed": true,
                "public_key": hex::encode(peer.public_key),
            }))
            .into_response()
        }
        Err(e) => {
            warn!("Unregistration from {:?} rejected: {}", ip, e);
            e.into_response()
        }
    }
}
