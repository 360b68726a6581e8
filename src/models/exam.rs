// src/models/exam.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Lifecycle states of an exam. Content mutation is only allowed in DRAFT;
/// the cache warm happens on the DRAFT -> PUBLISHED transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamStatus {
    Draft,
    Published,
    InProgress,
    Completed,
    Archived,
}

/// Represents the 'exams' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub author_id: i32,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub duration_minutes: i32,

    /// Short shared secret a student must present at join time.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entry_token: String,

    /// Opaque cheat-detection rules forwarded to clients verbatim.
    pub cheat_rules: serde_json::Value,

    /// Cap on how many questions each student receives; 0 = all.
    pub question_count: i32,

    pub randomize_questions: bool,
    pub qbank_id: Option<Uuid>,
    pub status: ExamStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// DTO for creating a new exam (always created as DRAFT).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 3, max = 255, message = "Title length must be between 3 and 255."))]
    pub title: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 480, message = "Duration must be between 1 and 480 minutes."))]
    pub duration_minutes: i32,
    #[validate(length(min = 4, max = 20, message = "Entry token length must be between 4 and 20."))]
    pub entry_token: String,
    pub cheat_rules: Option<serde_json::Value>,
    pub question_count: Option<i32>,
    pub randomize_questions: Option<bool>,
}

/// The Redis-cached payload served to students. Never carries correct answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamPayload {
    pub exam_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub questions: Vec<QuestionForStudent>,
}

/// A question stripped of its correct option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionForStudent {
    pub id: Uuid,
    pub question_text: String,
    pub options: serde_json::Value,
    pub order_num: i32,
}
