// src/workers/scoring.rs

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PersistError, QueueWorker};
use crate::cache_keys;

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreMessage {
    pub student_id: i32,
    pub exam_id: String,
    pub score: f64,
}

pub struct ScoringWorker {
    pub pool: PgPool,
}

impl QueueWorker for ScoringWorker {
    type Payload = ScoreMessage;

    const NAME: &'static str = "scoring_worker";
    const QUEUE: &'static str = cache_keys::PERSIST_SCORES_QUEUE;

    async fn flush_bulk(&self, batch: &[ScoreMessage]) -> Result<(), sqlx::Error> {
        let mut exam_ids = Vec::with_capacity(batch.len());
        let mut student_ids = Vec::with_capacity(batch.len());
        let mut scores = Vec::with_capacity(batch.len());

        for m in batch {
            let exam_id =
                Uuid::parse_str(&m.exam_id).map_err(|e| sqlx::Error::Decode(e.into()))?;
            exam_ids.push(exam_id);
            student_ids.push(m.student_id);
            scores.push(m.score);
        }

        sqlx::query(
            r#"
            UPDATE exam_sessions AS s
            SET status = 'COMPLETED',
                final_score = t.score,
                finished_at = NOW()
            FROM (
                SELECT u.exam_id, u.student_id, u.score
                FROM UNNEST($1::uuid[], $2::int[], $3::float8[])
                    AS u (exam_id, student_id, score)
            ) AS t
            WHERE s.exam_id = t.exam_id
              AND s.student_id = t.student_id
            "#,
        )
        .bind(&exam_ids)
        .bind(&student_ids)
        .bind(&scores)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn persist_single(&self, m: &ScoreMessage) -> Result<(), PersistError> {
        let exam_id = Uuid::parse_str(&m.exam_id)
            .map_err(|e| PersistError::Drop(format!("bad exam_id {}: {e}", m.exam_id)))?;

        sqlx::query(
            r#"
            UPDATE exam_sessions
            SET status = 'COMPLETED', final_score = $1, finished_at = NOW()
            WHERE exam_id = $2 AND student_id = $3
            "#,
        )
        .bind(m.score)
        .bind(exam_id)
        .bind(m.student_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| PersistError::Retry(e.to_string()))
    }

    /// Scores are durable; release the autosaved-answer buffers. This is the
    /// only place those hashes are deleted.
    async fn after_flush(&self, redis: &mut ConnectionManager, batch: &[ScoreMessage]) {
        let mut pipe = redis::pipe();
        for m in batch {
            if let Ok(exam_id) = Uuid::parse_str(&m.exam_id) {
                pipe.del(cache_keys::student_answers(m.student_id, exam_id))
                    .ignore();
            }
        }
        if let Err(e) = pipe.query_async::<()>(redis).await {
            tracing::warn!(error = %e, "Failed to clear autosaved answer buffers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_matches_queue_shape() {
        let raw = r#"{"student_id":3,"exam_id":"00000000-0000-0000-0000-000000000000","score":87.5}"#;
        let m: ScoreMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(m.student_id, 3);
        assert_eq!(m.score, 87.5);
    }
}
