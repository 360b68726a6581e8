// src/main.rs

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use examgate::config::Config;
use examgate::state::AppState;
use examgate::workers::{
    self, autosave::AutosaveWorker, cheat::CheatWorker, question_order::QuestionOrderWorker,
    scoring::ScoringWorker,
};
use examgate::{db, exam_cache, routes};

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env honored if present)
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::new(&config.rust_log);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Connect stores
    let pool = db::connect_postgres(&config)
        .await
        .expect("Failed to connect to PostgreSQL");

    let (redis_client, redis) = db::connect_redis(&config)
        .await
        .expect("Failed to connect to Redis");

    let state = AppState {
        pool: pool.clone(),
        redis: redis.clone(),
        redis_client: redis_client.clone(),
        config: config.clone(),
    };

    // Start persistence workers. Each gets its own Redis connection because
    // BLPOP blocks the connection it runs on.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = Vec::new();
    worker_handles.push(tokio::spawn(workers::run(
        AutosaveWorker { pool: pool.clone() },
        worker_connection(&redis_client).await,
        shutdown_rx.clone(),
    )));
    worker_handles.push(tokio::spawn(workers::run(
        ScoringWorker { pool: pool.clone() },
        worker_connection(&redis_client).await,
        shutdown_rx.clone(),
    )));
    worker_handles.push(tokio::spawn(workers::run(
        CheatWorker { pool: pool.clone() },
        worker_connection(&redis_client).await,
        shutdown_rx.clone(),
    )));
    worker_handles.push(tokio::spawn(workers::run(
        QuestionOrderWorker { pool: pool.clone() },
        worker_connection(&redis_client).await,
        shutdown_rx,
    )));

    // Prewarm all published exams BEFORE the listener binds. Lazy cache
    // loads under the exam-start join burst would race each other.
    {
        let mut redis = redis.clone();
        if let Err(e) = exam_cache::prewarm_all(&pool, &mut redis).await {
            tracing::warn!(error = %e, "Cache prewarm failed");
        }
    }

    let app = routes::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    // Serve until SIGINT/SIGTERM; in-flight requests get a bounded grace.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    tracing::info!("Shutting down gracefully...");

    // Stop workers and wait for their final flush.
    let _ = shutdown_tx.send(true);
    let drain = futures::future::join_all(worker_handles);
    if tokio::time::timeout(Duration::from_secs(7), drain).await.is_err() {
        tracing::error!("Workers did not drain in time");
    }

    tracing::info!("Shutdown complete");
}

async fn worker_connection(client: &redis::Client) -> redis::aio::ConnectionManager {
    client
        .get_connection_manager()
        .await
        .expect("Failed to open worker Redis connection")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
