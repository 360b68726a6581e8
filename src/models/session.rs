// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// States of a student's exam attempt. A session never returns to
/// IN_PROGRESS once the scoring worker marks it COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

/// Represents the 'exam_sessions' table. (exam_id, student_id) is unique,
/// which is what makes the join path idempotent under concurrency.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: i32,

    /// Per-student question order, written only by the question-order worker.
    pub question_order: Option<Json<Vec<String>>>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub final_score: Option<f64>,
}

/// DTO for a student joining an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinExamRequest {
    #[validate(length(min = 4, max = 20, message = "Entry token length must be between 4 and 20."))]
    pub entry_token: String,
}

/// Current exam state returned to a reconnecting client: what was already
/// answered and how much time is left.
#[derive(Debug, Serialize)]
pub struct ExamSessionState {
    pub exam_id: Uuid,
    pub student_id: i32,
    pub is_random_order: bool,
    pub cheat_rules: serde_json::Value,
    pub autosaved_answers: HashMap<String, String>,
    /// Seconds until the session deadline, clamped at zero.
    pub remaining_time: f64,
}
