// src/models/student.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'students' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: i32,

    /// National student number; the login identifier.
    pub nisn: String,

    pub name: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub religion: Option<String>,

    pub class_id: i32,
}

/// DTO for creating a new student (admin operation).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 4, max = 32, message = "NISN length must be between 4 and 32."))]
    pub nisn: String,
    #[validate(length(min = 1, max = 255, message = "Name is required."))]
    pub name: String,
    #[validate(length(min = 4, max = 64, message = "Password length must be between 4 and 64."))]
    pub password: String,
    pub religion: Option<String>,
    pub class_id: i32,
}

/// DTO for student login.
#[derive(Debug, Deserialize, Validate)]
pub struct StudentLoginRequest {
    #[validate(length(min = 1, message = "NISN is required."))]
    pub nisn: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}
