// src/models/target_rule.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents the 'exam_target_rules' table.
///
/// A rule with a class_id matches students of that class outright. A rule
/// without one matches when every non-null filter (grade level, major code,
/// religion) matches; null filters are wildcards.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamTargetRule {
    pub id: i32,
    pub exam_id: Uuid,
    pub class_id: Option<i32>,
    pub grade_level: Option<String>,
    pub major_code: Option<String>,
    pub religion: Option<String>,
}

/// DTO for attaching a target rule to an exam.
#[derive(Debug, Deserialize)]
pub struct CreateTargetRuleRequest {
    pub class_id: Option<i32>,
    pub grade_level: Option<String>,
    pub major_code: Option<String>,
    pub religion: Option<String>,
}
