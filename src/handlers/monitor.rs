// src/handlers/monitor.rs

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    Extension,
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    cache_keys,
    error::AppError,
    exam_cache,
    models::exam::Exam,
    monitor,
    sessions::{self, ResultFilters},
    state::AppState,
    utils::jwt::Claims,
};

const REFRESH_INTERVAL: Duration = Duration::from_secs(15);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Bounds every DB query so a slow store cannot stall the SSE loop.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Page size of the initial session scan.
const SNAPSHOT_LIMIT: i64 = 1000;

type SseItem = Result<Event, Infallible>;

/// GET /api/v1/admin/exams/{id}/monitor
/// SSE stream: one snapshot, then pub/sub forwarding plus periodic refresh
/// and keepalive events.
pub async fn monitor_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<Sse<ReceiverStream<SseItem>>, AppError> {
    if !claims.has_permission("exams:write") {
        return Err(AppError::PermissionDenied);
    }

    let exam = exam_cache::get_exam(&state.pool, exam_id).await?;

    let (tx, rx) = mpsc::channel::<SseItem>(32);
    tokio::spawn(monitor_loop(state, exam, tx));

    Ok(Sse::new(ReceiverStream::new(rx)))
}

async fn monitor_loop(state: AppState, exam: Exam, tx: mpsc::Sender<SseItem>) {
    let exam_id = exam.id;
    tracing::info!(exam_id = %exam_id, "Admin attached to live monitor");

    // Initial snapshot. If the client is already gone, stop here.
    let mut has_students = false;
    if let Some(snapshot) = build_snapshot(&state, &exam, &mut has_students).await {
        if tx.send(Ok(Event::default().data(snapshot))).await.is_err() {
            return;
        }
    }

    // Pub/sub subscription is an extension point; the stream stays useful
    // without it, so a failed subscribe only logs.
    let channel = cache_keys::exam_monitor_channel(exam_id);
    let mut messages = match state.redis_client.get_async_pubsub().await {
        Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
            Ok(()) => Some(pubsub.into_on_message()),
            Err(e) => {
                tracing::warn!(error = %e, "Monitor pub/sub subscribe failed");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Monitor pub/sub connection failed");
            None
        }
    };

    let mut refresh = interval_at(Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

    loop {
        let event = tokio::select! {
            message = async {
                match messages.as_mut() {
                    Some(stream) => stream.next().await,
                    // No subscription; let the other branches drive the loop.
                    None => std::future::pending().await,
                }
            } => {
                match message {
                    Some(message) => match message.get_payload::<String>() {
                        // Forward raw payloads verbatim.
                        Ok(payload) => {
                            has_students = true;
                            Some(Event::default().data(payload))
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable monitor message");
                            None
                        }
                    },
                    None => {
                        tracing::warn!(exam_id = %exam_id, "Monitor pub/sub stream ended");
                        messages = None;
                        None
                    }
                }
            }

            _ = refresh.tick() => {
                if has_students {
                    build_refresh(&state, &exam).await.map(|data| Event::default().data(data))
                } else {
                    None // nobody joined yet, skip the queries
                }
            }

            _ = keepalive.tick() => {
                Some(Event::default().data(json!({"type": "ping"}).to_string()))
            }
        };

        if let Some(event) = event {
            if tx.send(Ok(event)).await.is_err() {
                tracing::info!(exam_id = %exam_id, "Admin disconnected from live monitor");
                return;
            }
        }
    }
}

/// Gathers the initial snapshot: session rows plus per-student
/// answered/cheat counts, merged into one event.
async fn build_snapshot(state: &AppState, exam: &Exam, has_students: &mut bool) -> Option<String> {
    let results = match tokio::time::timeout(
        QUERY_TIMEOUT,
        sessions::get_exam_results(&state.pool, exam.id, 1, SNAPSHOT_LIMIT, &ResultFilters::default()),
    )
    .await
    {
        Ok(Ok((results, _total))) => results,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Snapshot session scan failed");
            vec![]
        }
        Err(_) => {
            tracing::warn!("Snapshot session scan timed out");
            vec![]
        }
    };

    *has_students = !results.is_empty();

    let total_joined = results.len();
    let mut total_in_progress = 0;
    let mut total_completed = 0;

    let progress = match tokio::time::timeout(
        QUERY_TIMEOUT,
        monitor::get_student_progress(&state.pool, exam.id),
    )
    .await
    {
        Ok(Ok(progress)) => progress,
        _ => monitor::StudentProgress::default(),
    };

    let students: Vec<serde_json::Value> = results
        .iter()
        .map(|r| {
            match r.status {
                crate::models::session::SessionStatus::InProgress => total_in_progress += 1,
                crate::models::session::SessionStatus::Completed => total_completed += 1,
            }
            json!({
                "student_id": r.student_id,
                "name": r.name,
                "class_name": r.class_name,
                "status": r.status,
                "score": r.final_score.unwrap_or(0.0),
                "started_at": r.started_at,
                "answered_count": progress.answered_counts.get(&r.student_id).copied().unwrap_or(0),
                "cheat_count": progress.cheat_counts.get(&r.student_id).copied().unwrap_or(0),
                "total_questions": exam.question_count,
            })
        })
        .collect();

    Some(
        json!({
            "type": "snapshot",
            "data": {
                "exam": {
                    "id": exam.id,
                    "title": exam.title,
                    "duration": exam.duration_minutes,
                    "total_questions": exam.question_count,
                },
                "stats": {
                    "total_joined": total_joined,
                    "total_in_progress": total_in_progress,
                    "total_completed": total_completed,
                    "total_cheats": progress.total_cheats,
                },
                "students": students,
            },
        })
        .to_string(),
    )
}

/// Compact periodic update with current answered/cheat counts.
async fn build_refresh(state: &AppState, exam: &Exam) -> Option<String> {
    let progress = match tokio::time::timeout(
        QUERY_TIMEOUT,
        monitor::get_student_progress(&state.pool, exam.id),
    )
    .await
    {
        Ok(Ok(progress)) => progress,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to fetch student progress for refresh");
            return None;
        }
        Err(_) => {
            tracing::warn!("Student progress refresh timed out");
            return None;
        }
    };

    let mut cheat_counts = progress.cheat_counts;
    let mut students: Vec<serde_json::Value> = progress
        .answered_counts
        .iter()
        .map(|(sid, answered)| {
            json!({
                "student_id": sid,
                "answered_count": answered,
                "cheat_count": cheat_counts.remove(sid).unwrap_or(0),
            })
        })
        .collect();

    // Students with cheat events but no saved answers (already submitted).
    for (sid, cheats) in cheat_counts {
        students.push(json!({
            "student_id": sid,
            "answered_count": 0,
            "cheat_count": cheats,
        }));
    }

    Some(
        json!({
            "type": "refresh",
            "total_questions": exam.question_count,
            "total_cheats": progress.total_cheats,
            "students": students,
        })
        .to_string(),
    )
}
