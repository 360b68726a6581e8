// src/workers/autosave.rs

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PersistError, QueueWorker};
use crate::cache_keys;

/// One autosaved answer. An empty `answer` is a tombstone: the row is
/// deleted instead of upserted.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerMessage {
    pub student_id: i32,
    pub exam_id: String,
    pub q_id: String,
    pub answer: String,
}

pub struct AutosaveWorker {
    pub pool: PgPool,
}

struct AnswerRows {
    exam_ids: Vec<Uuid>,
    student_ids: Vec<i32>,
    question_ids: Vec<Uuid>,
    answers: Vec<String>,
}

fn collect_rows(batch: &[&AnswerMessage]) -> Result<AnswerRows, sqlx::Error> {
    let mut rows = AnswerRows {
        exam_ids: Vec::with_capacity(batch.len()),
        student_ids: Vec::with_capacity(batch.len()),
        question_ids: Vec::with_capacity(batch.len()),
        answers: Vec::with_capacity(batch.len()),
    };

    for m in batch {
        // A bad UUID aborts the bulk path; the fallback drops it individually.
        let exam_id = Uuid::parse_str(&m.exam_id).map_err(|e| sqlx::Error::Decode(e.into()))?;
        let q_id = Uuid::parse_str(&m.q_id).map_err(|e| sqlx::Error::Decode(e.into()))?;
        rows.exam_ids.push(exam_id);
        rows.student_ids.push(m.student_id);
        rows.question_ids.push(q_id);
        rows.answers.push(m.answer.clone());
    }

    Ok(rows)
}

impl QueueWorker for AutosaveWorker {
    type Payload = AnswerMessage;

    const NAME: &'static str = "autosave_worker";
    const QUEUE: &'static str = cache_keys::PERSIST_ANSWERS_QUEUE;

    async fn flush_bulk(&self, batch: &[AnswerMessage]) -> Result<(), sqlx::Error> {
        let (tombstones, upserts): (Vec<&AnswerMessage>, Vec<&AnswerMessage>) =
            batch.iter().partition(|m| m.answer.is_empty());

        if !upserts.is_empty() {
            let rows = collect_rows(&upserts)?;
            sqlx::query(
                r#"
                INSERT INTO student_answers (exam_id, student_id, question_id, answer, updated_at)
                SELECT u.exam_id, u.student_id, u.question_id, u.answer, NOW()
                FROM UNNEST($1::uuid[], $2::int[], $3::uuid[], $4::text[])
                    AS u (exam_id, student_id, question_id, answer)
                ON CONFLICT (exam_id, student_id, question_id)
                DO UPDATE SET answer = EXCLUDED.answer, updated_at = NOW()
                "#,
            )
            .bind(&rows.exam_ids)
            .bind(&rows.student_ids)
            .bind(&rows.question_ids)
            .bind(&rows.answers)
            .execute(&self.pool)
            .await?;
        }

        if !tombstones.is_empty() {
            let rows = collect_rows(&tombstones)?;
            sqlx::query(
                r#"
                DELETE FROM student_answers AS s
                USING UNNEST($1::uuid[], $2::int[], $3::uuid[])
                    AS u (exam_id, student_id, question_id)
                WHERE s.exam_id = u.exam_id
                  AND s.student_id = u.student_id
                  AND s.question_id = u.question_id
                "#,
            )
            .bind(&rows.exam_ids)
            .bind(&rows.student_ids)
            .bind(&rows.question_ids)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn persist_single(&self, m: &AnswerMessage) -> Result<(), PersistError> {
        let exam_id = Uuid::parse_str(&m.exam_id)
            .map_err(|e| PersistError::Drop(format!("bad exam_id {}: {e}", m.exam_id)))?;
        let q_id = Uuid::parse_str(&m.q_id)
            .map_err(|e| PersistError::Drop(format!("bad q_id {}: {e}", m.q_id)))?;

        let result = if m.answer.is_empty() {
            sqlx::query(
                "DELETE FROM student_answers
                 WHERE exam_id = $1 AND student_id = $2 AND question_id = $3",
            )
            .bind(exam_id)
            .bind(m.student_id)
            .bind(q_id)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                INSERT INTO student_answers (exam_id, student_id, question_id, answer, updated_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (exam_id, student_id, question_id)
                DO UPDATE SET answer = EXCLUDED.answer, updated_at = NOW()
                "#,
            )
            .bind(exam_id)
            .bind(m.student_id)
            .bind(q_id)
            .bind(&m.answer)
            .execute(&self.pool)
            .await
        };

        result
            .map(|_| ())
            .map_err(|e| PersistError::Retry(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrip() {
        let raw = r#"{"student_id":7,"exam_id":"e","q_id":"q","answer":"A"}"#;
        let m: AnswerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(m.student_id, 7);
        assert_eq!(m.answer, "A");
        let encoded = serde_json::to_string(&m).unwrap();
        let again: AnswerMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(again.q_id, "q");
    }

    #[test]
    fn tombstones_partition_from_upserts() {
        let batch = vec![
            AnswerMessage {
                student_id: 1,
                exam_id: "e".into(),
                q_id: "q1".into(),
                answer: "A".into(),
            },
            AnswerMessage {
                student_id: 1,
                exam_id: "e".into(),
                q_id: "q2".into(),
                answer: String::new(),
            },
        ];
        let (tombstones, upserts): (Vec<&AnswerMessage>, Vec<&AnswerMessage>) =
            batch.iter().partition(|m| m.answer.is_empty());
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].q_id, "q2");
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].q_id, "q1");
    }
}
