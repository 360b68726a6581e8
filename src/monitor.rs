// src/monitor.rs
//
// Aggregate progress queries backing the live monitor SSE stream.

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;

/// Answered count and cheat count per student for one exam.
#[derive(Debug, Default)]
pub struct StudentProgress {
    pub answered_counts: HashMap<i32, i64>,
    pub cheat_counts: HashMap<i32, i64>,
    pub total_cheats: i64,
}

async fn answered_counts(pool: &PgPool, exam_id: Uuid) -> Result<HashMap<i32, i64>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i32, i64)>(
        "SELECT student_id, COUNT(*)
         FROM student_answers
         WHERE exam_id = $1
         GROUP BY student_id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

async fn cheat_counts(pool: &PgPool, exam_id: Uuid) -> Result<HashMap<i32, i64>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i32, i64)>(
        "SELECT student_id, COUNT(*)
         FROM exam_cheats
         WHERE exam_id = $1
         GROUP BY student_id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Both aggregates, fetched concurrently. Answered counts are required;
/// cheat counts are best-effort.
pub async fn get_student_progress(
    pool: &PgPool,
    exam_id: Uuid,
) -> Result<StudentProgress, AppError> {
    let (answered, cheats) = tokio::join!(
        answered_counts(pool, exam_id),
        cheat_counts(pool, exam_id)
    );

    let mut progress = StudentProgress {
        answered_counts: answered?,
        ..Default::default()
    };

    if let Ok(cheats) = cheats {
        progress.total_cheats = cheats.values().sum();
        progress.cheat_counts = cheats;
    }

    Ok(progress)
}
