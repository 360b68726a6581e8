// src/exam_cache.rs
//
// Exam cache management: materializes a published exam's student payload and
// answer key into Redis. Publish, refresh and the startup prewarm all funnel
// through warm_exam_cache so the payload and key are always written together.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    cache_keys,
    error::AppError,
    models::exam::{Exam, ExamPayload, ExamStatus, QuestionForStudent},
    models::question::Question,
    utils::jwt::Claims,
};

pub async fn get_exam(pool: &PgPool, exam_id: Uuid) -> Result<Exam, AppError> {
    let exam = sqlx::query_as::<_, Exam>(
        r#"
        SELECT id, title, author_id, scheduled_start, scheduled_end, duration_minutes,
               entry_token, cheat_rules, question_count, randomize_questions, qbank_id,
               status, created_at, updated_at
        FROM exams
        WHERE id = $1
        "#,
    )
    .bind(exam_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(exam)
}

/// Questions of the exam's bank, in authoring order.
pub async fn list_questions(pool: &PgPool, exam_id: Uuid) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT q.id, q.qbank_id, q.question_text, q.options, q.correct_option,
               q.order_num, q.created_at
        FROM questions q
        JOIN exams e ON e.qbank_id = q.qbank_id
        WHERE e.id = $1
        ORDER BY q.order_num, q.created_at
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(questions)
}

/// Loads the exam's payload and answer key from PostgreSQL into Redis.
///
/// The payload SET, the key DEL+HSET and the metadata SETs are sent as one
/// pipeline, so observers never see a payload without a matching key.
pub async fn warm_exam_cache(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    exam: &Exam,
) -> Result<(), AppError> {
    let questions = list_questions(pool, exam.id).await?;
    if questions.is_empty() {
        return Err(AppError::NoQuestions);
    }

    let student_questions: Vec<QuestionForStudent> = questions
        .iter()
        .map(|q| QuestionForStudent {
            id: q.id,
            question_text: q.question_text.clone(),
            options: serde_json::to_value(&q.options.0).unwrap_or_default(),
            order_num: q.order_num,
        })
        .collect();

    let payload = ExamPayload {
        exam_id: exam.id,
        title: exam.title.clone(),
        duration_minutes: exam.duration_minutes,
        questions: student_questions,
    };
    let payload_json = serde_json::to_string(&payload)?;

    let answer_pairs: Vec<(String, String)> = questions
        .iter()
        .map(|q| (q.id.to_string(), q.correct_option.clone()))
        .collect();

    let key_key = cache_keys::exam_answer_key(exam.id);

    let mut pipe = redis::pipe();
    pipe.set(cache_keys::exam_payload(exam.id), payload_json)
        .ignore()
        .del(&key_key)
        .ignore()
        .hset_multiple(&key_key, &answer_pairs)
        .ignore()
        .set(cache_keys::exam_duration(exam.id), exam.duration_minutes)
        .ignore()
        .set(
            cache_keys::exam_cheat_rules(exam.id),
            serde_json::to_string(&exam.cheat_rules)?,
        )
        .ignore()
        .set(
            cache_keys::exam_random_order(exam.id),
            exam.randomize_questions,
        )
        .ignore();

    pipe.query_async::<()>(redis).await?;

    tracing::debug!(exam_id = %exam.id, questions = questions.len(), "Cache warmed");
    Ok(())
}

fn check_author(exam: &Exam, claims: &Claims) -> Result<(), AppError> {
    if exam.author_id == claims.user_id || claims.has_permission("exams:write_all") {
        Ok(())
    } else {
        Err(AppError::NotExamAuthor)
    }
}

/// Publishes a DRAFT exam: warms the cache, then flips the status.
/// The warm runs first so a failed warm never leaves a published exam
/// without its payload.
pub async fn publish(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    exam_id: Uuid,
    claims: &Claims,
) -> Result<(), AppError> {
    let exam = get_exam(pool, exam_id).await?;

    check_author(&exam, claims)?;
    if exam.status != ExamStatus::Draft {
        return Err(AppError::ExamNotDraft);
    }

    warm_exam_cache(pool, redis, &exam).await?;

    sqlx::query("UPDATE exams SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(ExamStatus::Published)
        .bind(exam_id)
        .execute(pool)
        .await?;

    tracing::info!(exam_id = %exam_id, "Exam published");
    Ok(())
}

/// Re-caches the payload and answer key of an already published exam.
/// Used after post-publish question edits.
pub async fn refresh_cache(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    exam_id: Uuid,
    claims: &Claims,
) -> Result<(), AppError> {
    let exam = get_exam(pool, exam_id).await?;

    check_author(&exam, claims)?;
    if exam.status != ExamStatus::Published {
        return Err(AppError::ExamNotPublished);
    }

    warm_exam_cache(pool, redis, &exam).await?;

    tracing::info!(exam_id = %exam_id, "Cache refreshed");
    Ok(())
}

/// Warms every published exam at startup, before the listener binds.
/// Lazy loading under the exam-start join burst would race; per-exam
/// failures are logged and skipped so one broken exam cannot block boot.
pub async fn prewarm_all(pool: &PgPool, redis: &mut ConnectionManager) -> Result<(), AppError> {
    let exams = sqlx::query_as::<_, Exam>(
        r#"
        SELECT id, title, author_id, scheduled_start, scheduled_end, duration_minutes,
               entry_token, cheat_rules, question_count, randomize_questions, qbank_id,
               status, created_at, updated_at
        FROM exams
        WHERE status = $1
        "#,
    )
    .bind(ExamStatus::Published)
    .fetch_all(pool)
    .await?;

    if exams.is_empty() {
        tracing::info!("No published exams to prewarm");
        return Ok(());
    }

    let mut warmed = 0;
    for exam in &exams {
        match warm_exam_cache(pool, redis, exam).await {
            Ok(()) => warmed += 1,
            Err(e) => {
                tracing::warn!(exam_id = %exam.id, error = %e, "Failed to warm exam, skipping");
            }
        }
    }

    tracing::info!(warmed, total = exams.len(), "Prewarming complete");
    Ok(())
}

/// Retrieves the cached student payload.
pub async fn get_exam_payload(
    redis: &mut ConnectionManager,
    exam_id: Uuid,
) -> Result<ExamPayload, AppError> {
    let data: Option<String> = redis.get(cache_keys::exam_payload(exam_id)).await?;
    let data = data.ok_or(AppError::ExamNotPublished)?;
    Ok(serde_json::from_str(&data)?)
}

/// Retrieves the answer key hash for in-RAM grading.
pub async fn get_answer_key(
    redis: &mut ConnectionManager,
    exam_id: Uuid,
) -> Result<HashMap<String, String>, AppError> {
    let key: HashMap<String, String> = redis.hgetall(cache_keys::exam_answer_key(exam_id)).await?;
    if key.is_empty() {
        return Err(AppError::ExamNotPublished);
    }
    Ok(key)
}
