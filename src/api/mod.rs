use crate::bus::readings::ReadingBuffer;
use crate::cache::CacheReader;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::Duration;

pub mod handlers;
pub mod responses;

#[derive(Debug, Clone)]
pub struct ApiState {
    pub cache: CacheReader,
    pub buffer: Arc<ReadingBuffer>,
    /// Age after which a cached capacity is reported as stale.
    pub stale_after: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/capacity", get(handlers::get_capacity))
        .route("/api/health", get(handlers::get_health))
        .route("/api/readings", post(handlers::post_readings))
        .with_state(state)
}
