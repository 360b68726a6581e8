// src/handlers/ws.rs

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use chrono::Utc;
use redis::AsyncCommands;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    cache_keys,
    error::AppError,
    exam_cache, grader, sessions,
    state::AppState,
    utils::jwt::{self, TokenType},
    workers::autosave::AnswerMessage,
    workers::cheat::CheatMessage,
    workers::scoring::ScoreMessage,
    ws_protocol::{ClientMessage, ServerMessage},
};

/// Idle clients are disconnected after this long without a frame.
const READ_DEADLINE: Duration = Duration::from_secs(300);
/// Allowed time per outgoing frame.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Browser WebSocket clients cannot set headers, so the token rides in the
/// query string.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Checks the Origin header against the configured allowlist.
/// An empty allowlist permits any origin (development mode).
fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => allowed.iter().any(|a| a.eq_ignore_ascii_case(origin)),
        None => false,
    }
}

/// GET /ws/v1/student/exams/{exam_id}/stream?token=...
/// Upgrades to WebSocket for real-time autosave and instant grading.
pub async fn exam_stream(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Path(exam_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.config.allowed_origins, origin) {
        return Err(AppError::Forbidden);
    }

    let claims = jwt::verify_token(&state.config, &query.token)?;
    if claims.token_type != TokenType::Student {
        return Err(AppError::StudentAccessOnly);
    }

    // Re-check the single-device invariant at upgrade time; a superseded
    // token must not open a stream.
    let mut redis = state.redis.clone();
    crate::auth::validate_student_session(&mut redis, claims.user_id, &claims.jti).await?;

    let student_id = claims.user_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, exam_id, student_id)))
}

async fn send(socket: &mut WebSocket, message: ServerMessage) -> Result<(), ()> {
    let frame = Message::Text(message.to_json().into());
    match tokio::time::timeout(WRITE_DEADLINE, socket.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, exam_id: Uuid, student_id: i32) {
    let mut redis = state.redis.clone();

    if sessions::verify_active_session(&state.pool, &mut redis, exam_id, student_id)
        .await
        .is_err()
    {
        let _ = send(&mut socket, ServerMessage::error("no active session for this exam")).await;
        return;
    }

    let answers_key = cache_keys::student_answers(student_id, exam_id);
    tracing::info!(student_id, exam_id = %exam_id, "Student connected");

    loop {
        // Read deadline refreshes on every frame.
        let frame = match tokio::time::timeout(READ_DEADLINE, socket.recv()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(_))) | Ok(None) => {
                tracing::debug!(student_id, "Connection closed");
                break;
            }
            Err(_) => {
                tracing::debug!(student_id, "Read deadline exceeded, closing");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Protocol-level ping/pong is handled by the library.
            _ => continue,
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(_) => {
                if send(&mut socket, ServerMessage::error("invalid message format"))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let reply = match message {
            ClientMessage::Autosave { q_id, ans } => {
                Some(handle_autosave(&mut redis, &answers_key, student_id, exam_id, q_id, ans).await)
            }
            ClientMessage::Submit => {
                Some(handle_submit(&state, &mut redis, &answers_key, student_id, exam_id).await)
            }
            ClientMessage::Cheat { payload } => {
                // Intentionally unacknowledged: silent logging keeps clients
                // from probing the detection system.
                handle_cheat(&mut redis, student_id, exam_id, payload).await;
                None
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        };

        if let Some(reply) = reply {
            if send(&mut socket, reply).await.is_err() {
                break;
            }
        }
    }
}

/// Saves or erases one answer in the Redis hash and queues it for the
/// autosave worker. An empty answer erases and enqueues a tombstone.
async fn handle_autosave(
    redis: &mut redis::aio::ConnectionManager,
    answers_key: &str,
    student_id: i32,
    exam_id: Uuid,
    q_id: String,
    ans: String,
) -> ServerMessage {
    if q_id.is_empty() {
        return ServerMessage::error("q_id is required");
    }
    // Well-formed UUIDs only; anything else could corrupt cache keys.
    if Uuid::parse_str(&q_id).is_err() {
        return ServerMessage::error("invalid q_id format");
    }

    let erase = ans.is_empty();
    let write = if erase {
        redis.hdel::<_, _, ()>(answers_key, &q_id).await
    } else {
        redis.hset::<_, _, _, ()>(answers_key, &q_id, &ans).await
    };
    if let Err(e) = write {
        tracing::error!(student_id, error = %e, "Autosave cache write failed");
        return ServerMessage::error("save failed");
    }

    let message = AnswerMessage {
        student_id,
        exam_id: exam_id.to_string(),
        q_id,
        answer: ans,
    };
    match serde_json::to_string(&message) {
        Ok(raw) => {
            if let Err(e) = redis
                .rpush::<_, _, ()>(cache_keys::PERSIST_ANSWERS_QUEUE, raw)
                .await
            {
                tracing::error!(student_id, error = %e, "Autosave enqueue failed");
                return ServerMessage::error("save failed");
            }
        }
        Err(e) => {
            tracing::error!(student_id, error = %e, "Autosave encode failed");
            return ServerMessage::error("save failed");
        }
    }

    ServerMessage::Success {
        status: if erase { "removed" } else { "saved" },
    }
}

/// Grades the exam in RAM against the student's own question subset and
/// queues the score. The session is marked COMPLETED asynchronously by the
/// scoring worker, not here.
async fn handle_submit(
    state: &AppState,
    redis: &mut redis::aio::ConnectionManager,
    answers_key: &str,
    student_id: i32,
    exam_id: Uuid,
) -> ServerMessage {
    let answer_key = match exam_cache::get_answer_key(redis, exam_id).await {
        Ok(key) => key,
        Err(e) => {
            tracing::error!(student_id, error = %e, "Get answer key failed");
            return ServerMessage::error("grading failed");
        }
    };

    let student_answers: std::collections::HashMap<String, String> =
        match redis.hgetall(answers_key).await {
            Ok(answers) => answers,
            Err(e) => {
                tracing::error!(student_id, error = %e, "Get student answers failed");
                return ServerMessage::error("failed to get answers");
            }
        };

    let shuffled =
        match sessions::get_shuffled_question_ids(&state.pool, redis, exam_id, student_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(student_id, error = %e, "Get question order failed");
                return ServerMessage::error("grading failed");
            }
        };

    let score = grader::grade(&answer_key, &student_answers, &shuffled);

    let message = ScoreMessage {
        student_id,
        exam_id: exam_id.to_string(),
        score,
    };
    match serde_json::to_string(&message) {
        Ok(raw) => {
            if let Err(e) = redis
                .rpush::<_, _, ()>(cache_keys::PERSIST_SCORES_QUEUE, raw)
                .await
            {
                tracing::error!(student_id, error = %e, "Score enqueue failed");
                return ServerMessage::error("submit failed");
            }
        }
        Err(e) => {
            tracing::error!(student_id, error = %e, "Score encode failed");
            return ServerMessage::error("submit failed");
        }
    }

    tracing::info!(student_id, exam_id = %exam_id, score, "Exam submitted and graded");

    ServerMessage::Graded {
        status: "completed",
        score,
    }
}

async fn handle_cheat(
    redis: &mut redis::aio::ConnectionManager,
    student_id: i32,
    exam_id: Uuid,
    payload: String,
) {
    let message = CheatMessage {
        student_id,
        exam_id: exam_id.to_string(),
        timestamp: Utc::now().timestamp(),
        payload,
    };
    match serde_json::to_string(&message) {
        Ok(raw) => {
            if let Err(e) = redis
                .rpush::<_, _, ()>(cache_keys::PERSIST_CHEATS_QUEUE, raw)
                .await
            {
                tracing::error!(student_id, error = %e, "Cheat enqueue failed");
            }
        }
        Err(e) => {
            tracing::error!(student_id, error = %e, "Cheat encode failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_permits_any_origin() {
        assert!(origin_allowed(&[], Some("https://evil.example")));
        assert!(origin_allowed(&[], None));
    }

    #[test]
    fn allowlist_is_case_insensitive_and_exact() {
        let allowed = vec!["https://app.example".to_string()];
        assert!(origin_allowed(&allowed, Some("https://app.example")));
        assert!(origin_allowed(&allowed, Some("HTTPS://APP.EXAMPLE")));
        assert!(!origin_allowed(&allowed, Some("https://other.example")));
        assert!(!origin_allowed(&allowed, None));
    }
}
