// src/handlers/auth.rs

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use serde_json::json;
use validator::Validate;

use crate::{
    auth,
    error::{validation_fields, AppError},
    models::admin::{Admin, AdminLoginRequest},
    models::student::{Student, StudentLoginRequest},
    response,
    state::AppState,
    utils::{hash::verify_password, jwt::Claims},
};

/// Authenticates a student by NISN and issues a single-device token.
///
/// A second login while a session is active fails with 409
/// SESSION_ALREADY_ACTIVE until an admin resets the session.
pub async fn student_login(
    State(state): State<AppState>,
    Json(payload): Json<StudentLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }

    let student = sqlx::query_as::<_, Student>(
        "SELECT id, nisn, name, password, religion, class_id FROM students WHERE nisn = $1",
    )
    .bind(&payload.nisn)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&payload.password, &student.password)? {
        return Err(AppError::InvalidCredentials);
    }

    let mut redis = state.redis.clone();
    let token =
        auth::issue_student_token(&mut redis, &state.config, student.id, student.class_id).await?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "token": token, "student": student }),
    ))
}

/// Clears the student's single-device session key, allowing a new login.
pub async fn student_logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let mut redis = state.redis.clone();
    auth::reset_student_session(&mut redis, claims.user_id).await?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "status": "logged_out" }),
    ))
}

/// Authenticates an admin and issues a token carrying the role's
/// permission codes.
pub async fn admin_login(
    State(state): State<AppState>,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }

    let admin = sqlx::query_as::<_, Admin>(
        "SELECT id, email, name, password, role_id FROM admins WHERE email = $1",
    )
    .bind(&payload.email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&payload.password, &admin.password)? {
        return Err(AppError::InvalidCredentials);
    }

    let permissions = sqlx::query_scalar::<_, String>(
        "SELECT p.code
         FROM permissions p
         JOIN role_permissions rp ON rp.permission_id = p.id
         WHERE rp.role_id = $1",
    )
    .bind(admin.role_id)
    .fetch_all(&state.pool)
    .await?;

    let token =
        auth::issue_admin_token(&state.config, admin.id, admin.role_id, permissions.clone())?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "token": token, "admin": admin, "permissions": permissions }),
    ))
}
