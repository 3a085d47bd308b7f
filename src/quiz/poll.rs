use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::messages::{OptionResult, ResultsSnapshot};
use crate::error::{QuizError, Result};

/// One timed multiple-choice question open for answers.
///
/// A constructed poll is immediately active; an ended poll is removed from
/// its session and survives only as the [`ResultsSnapshot`] handed to the
/// broadcast. `seq` is the session-scoped sequence number used to detect
/// stale timer fires.
#[derive(Debug)]
pub struct Poll {
    pub seq: u64,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    /// connection id -> chosen option index, first submission wins
    answers: HashMap<String, usize>,
}

impl Poll {
    pub fn new(
        seq: u64,
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    ) -> Result<Self> {
        Self::validate(&question, &options, correct_option, duration_secs)?;

        Ok(Self {
            seq,
            question,
            options,
            correct_option,
            duration_secs,
            started_at: Utc::now(),
            answers: HashMap::new(),
        })
    }

    /// Shared validation for polls and poll-bank templates.
    pub fn validate(
        question: &str,
        options: &[String],
        correct_option: usize,
        duration_secs: u64,
    ) -> Result<()> {
        if question.trim().is_empty() {
            return Err(QuizError::InvalidPoll("question must not be empty".to_string()));
        }

        let non_empty = options.iter().filter(|o| !o.trim().is_empty()).count();
        if non_empty < 2 {
            return Err(QuizError::InvalidPoll(
                "at least two non-empty options are required".to_string(),
            ));
        }

        if correct_option >= options.len() {
            return Err(QuizError::InvalidPoll(format!(
                "correct option {} is out of range for {} options",
                correct_option,
                options.len()
            )));
        }

        if duration_secs == 0 {
            return Err(QuizError::InvalidPoll("duration must be positive".to_string()));
        }

        Ok(())
    }

    /// Seconds left before timeout, clamped to zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.started_at).num_seconds().max(0) as u64;
        self.duration_secs.saturating_sub(elapsed)
    }

    /// Records an answer for `connection_id`, first submission wins.
    /// Returns whether the chosen option was the correct one.
    pub fn record_answer(&mut self, connection_id: &str, option_index: usize) -> Result<bool> {
        if self.answers.contains_key(connection_id) {
            return Err(QuizError::AlreadyAnswered);
        }

        if option_index >= self.options.len() {
            return Err(QuizError::InvalidOption(option_index));
        }

        self.answers.insert(connection_id.to_string(), option_index);
        Ok(option_index == self.correct_option)
    }

    pub fn has_answered(&self, connection_id: &str) -> bool {
        self.answers.contains_key(connection_id)
    }

    pub fn answer_count(&self) -> usize {
        self.answers.len()
    }

    /// Consumes the poll and produces the broadcastable results summary.
    /// Percentages are computed over the roster size at end time; an empty
    /// roster yields all zeros. Ties are left to the presentation layer.
    pub fn into_snapshot(self, total_participants: usize) -> ResultsSnapshot {
        let mut counts = vec![0usize; self.options.len()];
        for &index in self.answers.values() {
            counts[index] += 1;
        }

        let results = self
            .options
            .into_iter()
            .zip(counts)
            .map(|(text, count)| {
                let percentage = if total_participants == 0 {
                    0
                } else {
                    ((count * 100) as f64 / total_participants as f64).round() as u32
                };
                OptionResult { text, count, percentage }
            })
            .collect();

        ResultsSnapshot {
            question: self.question,
            results,
            correct_option: self.correct_option,
            total_responses: self.answers.len(),
            total_participants,
        }
    }
}
