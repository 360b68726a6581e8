// src/grader.rs

use std::collections::HashMap;

/// Grades a submission entirely in RAM.
///
/// Only questions in the student's own subset count, and unanswered
/// questions in that subset count as wrong. The denominator is the subset
/// length, not the full answer key.
pub fn grade(
    answer_key: &HashMap<String, String>,
    student_answers: &HashMap<String, String>,
    shuffled_ids: &[String],
) -> f64 {
    if shuffled_ids.is_empty() {
        return 0.0;
    }

    let correct = shuffled_ids
        .iter()
        .filter(|qid| {
            match (answer_key.get(*qid), student_answers.get(*qid)) {
                (Some(key), Some(answer)) => key == answer,
                _ => false,
            }
        })
        .count();

    (correct as f64 / shuffled_ids.len() as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_marks() {
        let key = map(&[("q1", "A"), ("q2", "B")]);
        let answers = map(&[("q1", "A"), ("q2", "B")]);
        let ids = vec!["q1".to_string(), "q2".to_string()];
        assert_eq!(grade(&key, &answers, &ids), 100.0);
    }

    #[test]
    fn unanswered_subset_questions_count_as_wrong() {
        let key = map(&[("q1", "A"), ("q2", "B"), ("q3", "C"), ("q4", "D")]);
        let answers = map(&[("q1", "A"), ("q2", "B")]);
        let ids: Vec<String> = ["q1", "q2", "q3", "q4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(grade(&key, &answers, &ids), 50.0);
    }

    #[test]
    fn denominator_is_subset_not_full_key() {
        // The bank has 10 questions but the student's subset only 2.
        let key: HashMap<String, String> =
            (0..10).map(|i| (format!("q{i}"), "A".to_string())).collect();
        let answers = map(&[("q0", "A"), ("q1", "A")]);
        let ids = vec!["q0".to_string(), "q1".to_string()];
        assert_eq!(grade(&key, &answers, &ids), 100.0);
    }

    #[test]
    fn answers_outside_subset_are_ignored() {
        let key = map(&[("q1", "A"), ("q2", "B")]);
        let answers = map(&[("q1", "A"), ("q2", "B")]);
        let ids = vec!["q1".to_string()];
        assert_eq!(grade(&key, &answers, &ids), 100.0);
    }

    #[test]
    fn empty_subset_scores_zero() {
        let key = map(&[("q1", "A")]);
        let answers = map(&[("q1", "A")]);
        assert_eq!(grade(&key, &answers, &[]), 0.0);
    }

    #[test]
    fn grading_is_deterministic() {
        let key = map(&[("q1", "A"), ("q2", "B"), ("q3", "C")]);
        let answers = map(&[("q1", "A"), ("q3", "D")]);
        let ids: Vec<String> = ["q1", "q2", "q3"].iter().map(|s| s.to_string()).collect();
        let first = grade(&key, &answers, &ids);
        for _ in 0..100 {
            assert_eq!(grade(&key, &answers, &ids), first);
        }
    }
}
