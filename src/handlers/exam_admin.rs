// src/handlers/exam_admin.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth,
    error::{validation_fields, AppError},
    exam_cache,
    models::exam::{CreateExamRequest, Exam, ExamStatus},
    models::question::CreateQuestionRequest,
    models::student::{CreateStudentRequest, Student},
    models::target_rule::{CreateTargetRuleRequest, ExamTargetRule},
    response::{self, Pagination},
    sessions::{self, ResultFilters},
    state::AppState,
    utils::hash::{hash_password, HashCost},
    utils::jwt::Claims,
};

fn require_permission(claims: &Claims, code: &str) -> Result<(), AppError> {
    if claims.has_permission(code) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied)
    }
}

/// POST /api/v1/admin/students
/// Creates a student with the cheap student KDF profile. Duplicate NISN
/// surfaces as 409 CONFLICT via the unique constraint.
pub async fn create_student(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateStudentRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "students:write")?;
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }

    let hashed = hash_password(&payload.password, HashCost::Student)?;

    let student = sqlx::query_as::<_, Student>(
        r#"
        INSERT INTO students (nisn, name, password, religion, class_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, nisn, name, password, religion, class_id
        "#,
    )
    .bind(&payload.nisn)
    .bind(&payload.name)
    .bind(&hashed)
    .bind(&payload.religion)
    .bind(payload.class_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(response::success(StatusCode::CREATED, student))
}

/// POST /api/v1/admin/students/{id}/reset-session
/// Drops the single-device key so the student can log in again.
pub async fn reset_student_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(student_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "students:write")?;

    let mut redis = state.redis.clone();
    auth::reset_student_session(&mut redis, student_id).await?;

    Ok(response::success(StatusCode::OK, json!({ "status": "reset" })))
}

/// POST /api/v1/admin/exams
/// Creates a DRAFT exam together with its question bank.
pub async fn create_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }

    let mut tx = state.pool.begin().await?;

    let qbank_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO question_banks (name) VALUES ($1) RETURNING id",
    )
    .bind(format!("{} bank", payload.title))
    .fetch_one(&mut *tx)
    .await?;

    let exam = sqlx::query_as::<_, Exam>(
        r#"
        INSERT INTO exams (title, author_id, scheduled_start, scheduled_end, duration_minutes,
                           entry_token, cheat_rules, question_count, randomize_questions,
                           qbank_id, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'DRAFT')
        RETURNING id, title, author_id, scheduled_start, scheduled_end, duration_minutes,
                  entry_token, cheat_rules, question_count, randomize_questions, qbank_id,
                  status, created_at, updated_at
        "#,
    )
    .bind(&payload.title)
    .bind(claims.user_id)
    .bind(payload.scheduled_start)
    .bind(payload.scheduled_end)
    .bind(payload.duration_minutes)
    .bind(&payload.entry_token)
    .bind(payload.cheat_rules.unwrap_or_else(|| json!({})))
    .bind(payload.question_count.unwrap_or(0))
    .bind(payload.randomize_questions.unwrap_or(true))
    .bind(qbank_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(response::success(StatusCode::CREATED, exam))
}

/// POST /api/v1/admin/exams/{id}/questions
/// Appends a question to the exam's bank. Allowed in DRAFT and in
/// PUBLISHED (followed by a cache refresh); later states are frozen.
pub async fn add_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;
    if let Err(errors) = payload.validate() {
        return Err(AppError::Validation(validation_fields(&errors)));
    }

    let exam = exam_cache::get_exam(&state.pool, exam_id).await?;
    if exam.author_id != claims.user_id && !claims.has_permission("exams:write_all") {
        return Err(AppError::NotExamAuthor);
    }
    if exam.status != ExamStatus::Draft && exam.status != ExamStatus::Published {
        return Err(AppError::ExamNotDraft);
    }
    let qbank_id = exam.qbank_id.ok_or(AppError::NotFound)?;

    let question_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO questions (qbank_id, question_text, options, correct_option, order_num)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(qbank_id)
    .bind(&payload.question_text)
    .bind(serde_json::to_value(&payload.options)?)
    .bind(&payload.correct_option)
    .bind(payload.order_num.unwrap_or(0))
    .fetch_one(&state.pool)
    .await?;

    Ok(response::success(
        StatusCode::CREATED,
        json!({ "id": question_id }),
    ))
}

/// POST /api/v1/admin/exams/{id}/target-rules
/// Attaches a targeting rule. The whole-tuple unique constraint turns
/// duplicates into 409 DUPLICATE_TARGET_RULE.
pub async fn add_target_rule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<CreateTargetRuleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;

    let exam = exam_cache::get_exam(&state.pool, exam_id).await?;
    if exam.author_id != claims.user_id && !claims.has_permission("exams:write_all") {
        return Err(AppError::NotExamAuthor);
    }

    let rule = sqlx::query_as::<_, ExamTargetRule>(
        r#"
        INSERT INTO exam_target_rules (exam_id, class_id, grade_level, major_code, religion)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, exam_id, class_id, grade_level, major_code, religion
        "#,
    )
    .bind(exam_id)
    .bind(payload.class_id)
    .bind(&payload.grade_level)
    .bind(&payload.major_code)
    .bind(&payload.religion)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict => AppError::DuplicateTargetRule,
        other => other,
    })?;

    Ok(response::success(StatusCode::CREATED, rule))
}

/// POST /api/v1/admin/exams/{id}/publish
/// Warms the cache and flips DRAFT to PUBLISHED.
pub async fn publish_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;

    let mut redis = state.redis.clone();
    exam_cache::publish(&state.pool, &mut redis, exam_id, &claims).await?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "status": "PUBLISHED" }),
    ))
}

/// POST /api/v1/admin/exams/{id}/refresh-cache
/// Re-caches a published exam after question edits.
pub async fn refresh_exam_cache(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;

    let mut redis = state.redis.clone();
    exam_cache::refresh_cache(&state.pool, &mut redis, exam_id, &claims).await?;

    Ok(response::success(
        StatusCode::OK,
        json!({ "status": "refreshed" }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    pub class_id: Option<i32>,
    pub grade_level: Option<String>,
    pub major_code: Option<String>,
    pub group_number: Option<i32>,
    pub religion: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    10
}

/// GET /api/v1/admin/exams/{id}/results
/// Paginated per-student results with optional class filters.
pub async fn get_exam_results(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&claims, "exams:write")?;

    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 100);

    let filters = ResultFilters {
        class_id: query.class_id,
        grade_level: query.grade_level,
        major_code: query.major_code,
        group_number: query.group_number,
        religion: query.religion,
    };

    let (results, total) =
        sessions::get_exam_results(&state.pool, exam_id, page, per_page, &filters).await?;

    Ok(response::success_paginated(
        StatusCode::OK,
        json!({ "results": results }),
        Pagination::new(page, per_page, total),
    ))
}
