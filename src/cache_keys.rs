// src/cache_keys.rs
//
// Canonical Redis key construction. Every key the application touches is
// built here; no other module may format a cache key by hand. Answers,
// shuffle order and start-time invariants all hinge on these shapes staying
// in sync across handlers and workers.

use uuid::Uuid;

/// Single-device login key: holds the JTI of the only valid student token.
pub fn student_login(student_id: i32) -> String {
    format!("login:{student_id}")
}

/// Hash of `question_id -> answer` autosaved by one student for one exam.
pub fn student_answers(student_id: i32, exam_id: Uuid) -> String {
    format!("student:{student_id}:exam:{exam_id}:answers")
}

/// Unix seconds at which the student's session started.
pub fn session_start(student_id: i32, exam_id: Uuid) -> String {
    format!("student:{student_id}:exam:{exam_id}:session_start")
}

/// JSON array of question IDs in the student's per-session order.
pub fn shuffled_questions(student_id: i32, exam_id: Uuid) -> String {
    format!("student:{student_id}:exam:{exam_id}:shuffled_questions")
}

/// The exam the student is currently sitting.
pub fn active_exam(student_id: i32) -> String {
    format!("student:{student_id}:active_exam")
}

/// Student-facing exam payload (JSON, no correct answers).
pub fn exam_payload(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:payload")
}

/// Hash of `question_id -> correct_option` used for in-RAM grading.
pub fn exam_answer_key(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:key")
}

pub fn exam_duration(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:duration")
}

pub fn exam_cheat_rules(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:cheat_rules")
}

pub fn exam_random_order(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:random_order")
}

/// Pub/sub channel carrying live monitor events for one exam.
pub fn exam_monitor_channel(exam_id: Uuid) -> String {
    format!("exam:{exam_id}:monitor")
}

// Worker queues. FIFO lists of JSON payloads, one queue per worker.
pub const PERSIST_ANSWERS_QUEUE: &str = "persist_answers_queue";
pub const PERSIST_SCORES_QUEUE: &str = "persist_scores_queue";
pub const PERSIST_CHEATS_QUEUE: &str = "persist_cheats_queue";
pub const PERSIST_QUESTION_ORDER_QUEUE: &str = "persist_question_order_queue";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_are_stable() {
        let eid = Uuid::nil();
        assert_eq!(student_login(7), "login:7");
        assert_eq!(
            student_answers(7, eid),
            format!("student:7:exam:{eid}:answers")
        );
        assert_eq!(
            session_start(7, eid),
            format!("student:7:exam:{eid}:session_start")
        );
        assert_eq!(
            shuffled_questions(7, eid),
            format!("student:7:exam:{eid}:shuffled_questions")
        );
        assert_eq!(active_exam(7), "student:7:active_exam");
        assert_eq!(exam_payload(eid), format!("exam:{eid}:payload"));
        assert_eq!(exam_answer_key(eid), format!("exam:{eid}:key"));
        assert_eq!(exam_monitor_channel(eid), format!("exam:{eid}:monitor"));
    }
}
