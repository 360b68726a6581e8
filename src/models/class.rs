// src/models/class.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'classes' table.
/// The (grade_level, major_code, group_number) triple is unique.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Class {
    pub id: i32,
    pub grade_level: i32,
    pub major_code: String,
    pub group_number: i32,
}
