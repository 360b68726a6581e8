// src/workers/cheat.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PersistError, QueueWorker};
use crate::cache_keys;

#[derive(Debug, Serialize, Deserialize)]
pub struct CheatMessage {
    pub student_id: i32,
    pub exam_id: String,
    /// Unix seconds at which the client reported the event.
    pub timestamp: i64,
    /// Opaque event payload from the client.
    pub payload: String,
}

pub struct CheatWorker {
    pub pool: PgPool,
}

/// The column is jsonb but the client payload is opaque; anything that is
/// not valid JSON is stored as a JSON string.
fn event_json(payload: &str) -> serde_json::Value {
    serde_json::from_str(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()))
}

fn recorded_at(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

impl QueueWorker for CheatWorker {
    type Payload = CheatMessage;

    const NAME: &'static str = "cheat_worker";
    const QUEUE: &'static str = cache_keys::PERSIST_CHEATS_QUEUE;

    async fn flush_bulk(&self, batch: &[CheatMessage]) -> Result<(), sqlx::Error> {
        let mut exam_ids = Vec::with_capacity(batch.len());
        let mut student_ids = Vec::with_capacity(batch.len());
        let mut events = Vec::with_capacity(batch.len());
        let mut timestamps = Vec::with_capacity(batch.len());

        for m in batch {
            let exam_id =
                Uuid::parse_str(&m.exam_id).map_err(|e| sqlx::Error::Decode(e.into()))?;
            let at = recorded_at(m.timestamp)
                .ok_or_else(|| sqlx::Error::Decode("timestamp out of range".into()))?;
            exam_ids.push(exam_id);
            student_ids.push(m.student_id);
            events.push(event_json(&m.payload));
            timestamps.push(at);
        }

        sqlx::query(
            r#"
            INSERT INTO exam_cheats (exam_id, student_id, event_data, recorded_at)
            SELECT u.exam_id, u.student_id, u.event_data, u.recorded_at
            FROM UNNEST($1::uuid[], $2::int[], $3::jsonb[], $4::timestamptz[])
                AS u (exam_id, student_id, event_data, recorded_at)
            "#,
        )
        .bind(&exam_ids)
        .bind(&student_ids)
        .bind(&events)
        .bind(&timestamps)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn persist_single(&self, m: &CheatMessage) -> Result<(), PersistError> {
        let exam_id = Uuid::parse_str(&m.exam_id)
            .map_err(|e| PersistError::Drop(format!("bad exam_id {}: {e}", m.exam_id)))?;
        let at = recorded_at(m.timestamp)
            .ok_or_else(|| PersistError::Drop(format!("bad timestamp {}", m.timestamp)))?;

        sqlx::query(
            "INSERT INTO exam_cheats (exam_id, student_id, event_data, recorded_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(exam_id)
        .bind(m.student_id)
        .bind(event_json(&m.payload))
        .bind(at)
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
    fn opaque_payload_becomes_json_string() {
        assert_eq!(
            event_json("tab_switch"),
            serde_json::Value::String("tab_switch".into())
        );
        assert_eq!(
            event_json(r#"{"kind":"blur","count":2}"#),
            serde_json::json!({"kind":"blur","count":2})
        );
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        assert!(recorded_at(i64::MAX).is_none());
        assert!(recorded_at(1_700_000_000).is_some());
    }
}
