use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::messages::{ChatBroadcast, PollTemplate, StudentInfo};
use super::poll::Poll;
use crate::error::{QuizError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Session-level configuration, set at creation and immutable thereafter.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub title: String,
    pub description: String,
    pub max_participants: usize,
    pub allow_late_join: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(QuizError::InvalidConfiguration(
                "session title is required".to_string(),
            ));
        }
        if self.max_participants == 0 {
            return Err(QuizError::InvalidConfiguration(
                "max_participants must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A student's membership record within a session. Score and total answered
/// are monotone and persist across polls for the session's lifetime.
#[derive(Debug, Clone)]
pub struct Participant {
    pub connection_id: String,
    pub student_name: String,
    pub joined_at: DateTime<Utc>,
    pub has_answered: bool,
    pub score: u32,
    pub total_answered: u32,
}

/// The submitter's updated tallies plus the session-wide answered count,
/// returned from a successful answer submission.
#[derive(Debug, Clone, Copy)]
pub struct ScoreUpdate {
    pub score: u32,
    pub total_answered: u32,
    pub answered_count: usize,
    pub participant_count: usize,
}

/// One teacher-owned live quiz: roster, at most one active poll, chat log,
/// and a bank of reusable poll templates. All fields are mutated only under
/// the session's own mutex (see the registry).
pub struct Session {
    pub code: String,
    pub config: SessionConfig,
    pub created_at: DateTime<Utc>,
    /// Controlling teacher connection; rebinding overwrites the previous one.
    pub teacher: Option<String>,
    /// Roster in join order.
    participants: Vec<Participant>,
    pub current_poll: Option<Poll>,
    pub poll_bank: Vec<PollTemplate>,
    pub chat_log: Vec<ChatBroadcast>,
    next_poll_seq: u64,
    /// Pending timeout task for the current poll.
    timer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(code: String, config: SessionConfig) -> Self {
        Self {
            code,
            config,
            created_at: Utc::now(),
            teacher: None,
            participants: Vec::new(),
            current_poll: None,
            poll_bank: Vec::new(),
            chat_log: Vec::new(),
            next_poll_seq: 0,
            timer: None,
        }
    }

    pub fn bind_teacher(&mut self, connection_id: &str) {
        if let Some(previous) = &self.teacher {
            if previous != connection_id {
                tracing::info!(
                    session_code = %self.code,
                    previous = %previous,
                    connection_id = %connection_id,
                    "Teacher connection rebound"
                );
            }
        }
        self.teacher = Some(connection_id.to_string());
    }

    pub fn is_teacher(&self, connection_id: &str) -> bool {
        self.teacher.as_deref() == Some(connection_id)
    }

    /// Adds a student to the roster. Enforces the capacity limit and, when
    /// late join is disabled, rejects joins while a poll is running.
    pub fn add_participant(&mut self, connection_id: &str, student_name: &str) -> Result<()> {
        if self.participants.len() >= self.config.max_participants {
            return Err(QuizError::SessionFull(self.code.clone()));
        }
        if !self.config.allow_late_join && self.current_poll.is_some() {
            return Err(QuizError::QuizInactive(self.code.clone()));
        }

        self.participants.push(Participant {
            connection_id: connection_id.to_string(),
            student_name: student_name.to_string(),
            joined_at: Utc::now(),
            has_answered: false,
            score: 0,
            total_answered: 0,
        });
        Ok(())
    }

    pub fn participant(&self, connection_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.connection_id == connection_id)
    }

    pub fn remove_participant(&mut self, connection_id: &str) -> Option<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| p.connection_id == connection_id)?;
        Some(self.participants.remove(index))
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Roster in join order, as sent to clients.
    pub fn roster(&self) -> Vec<StudentInfo> {
        self.participants
            .iter()
            .map(|p| StudentInfo {
                student_id: p.connection_id.clone(),
                student_name: p.student_name.clone(),
                score: p.score,
                total_answered: p.total_answered,
                has_answered: p.has_answered,
                joined_at: p.joined_at,
            })
            .collect()
    }

    pub fn student_connection_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.connection_id.clone()).collect()
    }

    /// Every live connection in the session: teacher first, then students.
    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.participants.len() + 1);
        if let Some(teacher) = &self.teacher {
            ids.push(teacher.clone());
        }
        ids.extend(self.student_connection_ids());
        ids
    }

    /// Activates a new poll. Fails if one is already running. Resets every
    /// participant's answered flag exactly once per new poll.
    pub fn start_poll(
        &mut self,
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    ) -> Result<u64> {
        if self.current_poll.is_some() {
            return Err(QuizError::InvalidPoll(
                "a poll is already active in this session".to_string(),
            ));
        }

        let seq = self.next_poll_seq;
        let poll = Poll::new(seq, question, options, correct_option, duration_secs)?;
        self.next_poll_seq += 1;

        for participant in &mut self.participants {
            participant.has_answered = false;
        }
        self.current_poll = Some(poll);
        Ok(seq)
    }

    /// Records an answer for the given student connection and updates its
    /// running tallies. The session is left unchanged on any failure.
    pub fn submit_answer(&mut self, connection_id: &str, option_index: usize) -> Result<ScoreUpdate> {
        if self.participant(connection_id).is_none() {
            return Err(QuizError::NotFound(connection_id.to_string()));
        }

        let poll = self.current_poll.as_mut().ok_or(QuizError::NoActivePoll)?;
        let correct = poll.record_answer(connection_id, option_index)?;
        let answered_count = poll.answer_count();

        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.connection_id == connection_id)
            .ok_or_else(|| QuizError::NotFound(connection_id.to_string()))?;
        participant.total_answered += 1;
        if correct {
            participant.score += 1;
        }
        participant.has_answered = true;

        Ok(ScoreUpdate {
            score: participant.score,
            total_answered: participant.total_answered,
            answered_count,
            participant_count: self.participants.len(),
        })
    }

    /// Ends the current poll and hands back its results snapshot. The session
    /// does not retain ended polls. Timer bookkeeping is the caller's concern
    /// (manual end aborts it, a timeout fire merely clears it).
    pub fn end_poll(&mut self) -> Result<super::messages::ResultsSnapshot> {
        let poll = self.current_poll.take().ok_or(QuizError::NoActivePoll)?;
        Ok(poll.into_snapshot(self.participants.len()))
    }

    pub fn push_chat(&mut self, message: ChatBroadcast) {
        self.chat_log.push(message);
    }

    pub fn set_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_timer();
        self.timer = Some(handle);
    }

    /// Aborts and forgets the pending timeout task, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// Forgets the pending timer without aborting it. Used on the timeout
    /// path, where the firing task must not cancel itself mid-broadcast.
    pub fn clear_timer(&mut self) {
        self.timer = None;
    }
}
