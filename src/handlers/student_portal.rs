// src/handlers/student_portal.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{validation_fields, AppError},
    exam_cache, response,
    models::session::JoinExamRequest,
    sessions,
    state::AppState,
    utils::jwt::Claims,
};

/// GET /api/v1/student/lobby
/// Exams available to the student based on class targeting rules, overlaid
/// with the student's session state.
pub async fn get_lobby(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let class_id = claims.class_id.ok_or(AppError::StudentAccessOnly)?;

    let lobby = sessions::get_lobby(&state.pool, claims.user_id, class_id).await?;

    Ok(response::success(StatusCode::OK, json!({ "exams": lobby })))
}

/// POST /api/v1/student/exams/{exam_id}/join
/// Validates eligibility and the entry token, then creates the session.
/// Idempotent: rejoining returns the existing session.
pub async fn join_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<JoinExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }
    let class_id = claims.class_id.ok_or(AppError::StudentAccessOnly)?;

    let mut redis = state.redis.clone();
    let session = sessions::join_exam(
        &state.pool,
        &mut redis,
        exam_id,
        claims.user_id,
        class_id,
        &payload.entry_token,
    )
    .await?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "session": session }),
    ))
}

/// GET /api/v1/student/exams/{exam_id}/paper
/// The cached exam payload (no correct answers). Requires an active session
/// so students cannot download papers they have not joined.
pub async fn get_exam_paper(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut redis = state.redis.clone();
    sessions::verify_active_session(&state.pool, &mut redis, exam_id, claims.user_id).await?;

    let payload = exam_cache::get_exam_payload(&mut redis, exam_id).await?;

    Ok(response::success(StatusCode::OK, payload))
}

/// GET /api/v1/student/exams/{exam_id}/state
/// Autosaved answers plus remaining time; covers the page-reload path.
pub async fn get_exam_state(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut redis = state.redis.clone();
    sessions::verify_active_session(&state.pool, &mut redis, exam_id, claims.user_id).await?;

    let exam_state =
        sessions::get_exam_state(&state.pool, &mut redis, exam_id, claims.user_id).await?;

    Ok(response::success(StatusCode::OK, exam_state))
}
