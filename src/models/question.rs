// src/models/question.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

/// Represents the 'question_banks' table. Each exam derives its questions
/// from exactly one bank.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionBank {
    pub id: Uuid,
    pub name: String,
}

/// Represents the 'questions' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub qbank_id: Uuid,

    /// The text/html content of the question.
    pub question_text: String,

    /// List of option labels (e.g., ["3", "4", "5", "6"]).
    /// Stored as a JSON array in the database.
    pub options: Json<Vec<String>>,

    /// Index label of the correct option.
    pub correct_option: String,

    pub order_num: i32,

    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for adding a question to an exam's bank.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 4000, message = "Question text is required."))]
    pub question_text: String,
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    #[validate(length(min = 1, max = 8, message = "Correct option label is required."))]
    pub correct_option: String,
    pub order_num: Option<i32>,
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    if options.len() < 2 {
        return Err(validator::ValidationError::new("at_least_two_options"));
    }
    for opt in options {
        if opt.len() > 500 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}
