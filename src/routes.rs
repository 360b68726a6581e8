// src/routes.rs

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{auth, exam_admin, monitor, student_portal, ws},
    state::AppState,
    utils::jwt::{admin_auth_middleware, student_auth_middleware},
};

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        // Dev default: any origin.
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .map(|o| o.parse().expect("invalid origin in ALLOWED_ORIGINS"))
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

/// Assembles the main application router.
///
/// * Public auth routes sit behind a rate limiter.
/// * Student routes check the JWT and the single-device session key.
/// * Admin routes check the JWT; per-permission checks live in handlers.
/// * The WebSocket route authenticates inside the handler (query token).
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.allowed_origins);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .finish()
            .expect("invalid rate limiter configuration"),
    );

    let public_auth_routes = Router::new()
        .route("/student/login", post(auth::student_login))
        .route("/admin/login", post(auth::admin_login))
        .layer(GovernorLayer::new(governor_conf));

    let auth_routes = public_auth_routes.merge(
        Router::new()
            .route("/student/logout", post(auth::student_logout))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                student_auth_middleware,
            )),
    );

    let student_routes = Router::new()
        .route("/lobby", get(student_portal::get_lobby))
        .route("/exams/{exam_id}/join", post(student_portal::join_exam))
        .route("/exams/{exam_id}/paper", get(student_portal::get_exam_paper))
        .route("/exams/{exam_id}/state", get(student_portal::get_exam_state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            student_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/students", post(exam_admin::create_student))
        .route(
            "/students/{id}/reset-session",
            post(exam_admin::reset_student_session),
        )
        .route("/exams", post(exam_admin::create_exam))
        .route("/exams/{id}/questions", post(exam_admin::add_question))
        .route("/exams/{id}/target-rules", post(exam_admin::add_target_rule))
        .route("/exams/{id}/publish", post(exam_admin::publish_exam))
        .route(
            "/exams/{id}/refresh-cache",
            post(exam_admin::refresh_exam_cache),
        )
        .route("/exams/{id}/results", get(exam_admin::get_exam_results))
        .route("/exams/{id}/monitor", get(monitor::monitor_exam))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let ws_routes = Router::new().route("/student/exams/{exam_id}/stream", get(ws::exam_stream));

    Router::new()
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1/student", student_routes)
        .nest("/api/v1/admin", admin_routes)
        .nest("/ws/v1", ws_routes)
        // Global middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
