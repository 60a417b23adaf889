use std::sync::Arc;

use axum::http::StatusCode;
use axum::{middleware, routing::get, Json, Router};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use axum::extract::State;
use common::types::Health;
use store::Store;

use crate::auth;

pub mod kv;

/// Shared handler state: the store handle and the optional auth key.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub auth_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<Store>, auth_key: Option<String>) -> Self {
        Self { store, auth_key: auth_key.filter(|k| !k.is_empty()).map(Arc::from) }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health::ok(state.store.len().await))
}

/// Prometheus text exposition of the store metrics.
pub fn metrics_text() -> (StatusCode, String) {
    match store::metrics::encode_metrics() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}")),
    }
}

pub async fn metrics() -> (StatusCode, String) {
    metrics_text()
}

/// Build the full application router: public health check plus the
/// key-protected CRUD and metrics routes.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/", get(kv::list_all).post(kv::create).patch(kv::update))
        .route("/metrics", get(metrics))
        .route("/:keys", get(kv::read_keys).delete(kv::delete_keys))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_key));

    public
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
