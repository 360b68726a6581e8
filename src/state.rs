// src/state.rs

use axum::extract::FromRef;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Multiplexed Redis connection for command traffic. Cloning is cheap
    /// and shares the underlying connection.
    pub redis: ConnectionManager,
    /// Raw client retained for pub/sub subscriptions (monitor SSE).
    pub redis_client: redis::Client,
    pub config: Config,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for ConnectionManager {
    fn from_ref(state: &AppState) -> Self {
        state.redis.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
