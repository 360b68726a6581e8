// src/db.rs

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::Config;

/// Connects the PostgreSQL pool sized for the expected join burst.
pub async fn connect_postgres(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_conns)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    tracing::info!(max_conns = config.max_db_conns, "Database connected");
    Ok(pool)
}

/// Connects Redis. Returns both the multiplexed connection manager used for
/// command traffic and the raw client, which is kept for pub/sub
/// subscriptions (the manager cannot subscribe).
pub async fn connect_redis(
    config: &Config,
) -> Result<(redis::Client, ConnectionManager), redis::RedisError> {
    let client = redis::Client::open(config.redis_url.as_str())?;

    let manager_config = ConnectionManagerConfig::new()
        .set_number_of_retries(3)
        .set_connection_timeout(Duration::from_secs(2));

    let manager = client
        .get_connection_manager_with_config(manager_config)
        .await?;

    tracing::info!("Redis connected");
    Ok((client, manager))
}
