// src/workers/question_order.rs

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PersistError, QueueWorker};
use crate::cache_keys;

/// Per-student question order generated at join time. The session row's
/// question_order column is written only by this worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionOrderMessage {
    pub exam_id: String,
    pub student_id: i32,
    pub order: Vec<String>,
}

pub struct QuestionOrderWorker {
    pub pool: PgPool,
}

impl QueueWorker for QuestionOrderWorker {
    type Payload = QuestionOrderMessage;

    const NAME: &'static str = "question_order_worker";
    const QUEUE: &'static str = cache_keys::PERSIST_QUESTION_ORDER_QUEUE;

    async fn flush_bulk(&self, batch: &[QuestionOrderMessage]) -> Result<(), sqlx::Error> {
        let mut exam_ids = Vec::with_capacity(batch.len());
        let mut student_ids = Vec::with_capacity(batch.len());
        let mut orders = Vec::with_capacity(batch.len());

        for m in batch {
            let exam_id =
                Uuid::parse_str(&m.exam_id).map_err(|e| sqlx::Error::Decode(e.into()))?;
            exam_ids.push(exam_id);
            student_ids.push(m.student_id);
            orders.push(serde_json::to_value(&m.order).unwrap_or_default());
        }

        sqlx::query(
            r#"
            UPDATE exam_sessions AS s
            SET question_order = t.qo
            FROM (
                SELECT u.exam_id, u.student_id, u.qo
                FROM UNNEST($1::uuid[], $2::int[], $3::jsonb[])
                    AS u (exam_id, student_id, qo)
            ) AS t
            WHERE s.exam_id = t.exam_id
              AND s.student_id = t.student_id
            "#,
        )
        .bind(&exam_ids)
        .bind(&student_ids)
        .bind(&orders)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn persist_single(&self, m: &QuestionOrderMessage) -> Result<(), PersistError> {
        let exam_id = Uuid::parse_str(&m.exam_id)
            .map_err(|e| PersistError::Drop(format!("bad exam_id {}: {e}", m.exam_id)))?;

        sqlx::query(
            "UPDATE exam_sessions SET question_order = $1
             WHERE exam_id = $2 AND student_id = $3",
        )
        .bind(serde_json::to_value(&m.order).unwrap_or_default())
        .bind(exam_id)
        .bind(m.student_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| PersistError::Retry(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_preserves_order() {
        let raw = r#"{"exam_id":"e","student_id":1,"order":["q3","q1","q2"]}"#;
        let m: QuestionOrderMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(m.order, vec!["q3", "q1", "q2"]);
    }
}
