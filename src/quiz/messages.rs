use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::Role;

/// Inbound actions, one connection per participant. The connection identity
/// is supplied by the transport layer, never by the client payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    TeacherJoin {
        quiz_code: String,
    },

    StudentJoin {
        student_name: String,
        quiz_code: String,
    },

    CreatePoll {
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    },

    SubmitAnswer {
        option_index: usize,
    },

    EndPoll,

    /// Store a poll template in the session's poll bank without starting it.
    SavePoll {
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    },

    /// Start a previously banked template by its position in the bank.
    StartSavedPoll {
        index: usize,
    },

    KickStudent {
        student_id: String,
    },

    ChatMessage {
        text: String,
    },
}

/// Outbound notifications computed by the coordinator and handed to the
/// transport for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    TeacherJoined {
        quiz_code: String,
        students: Vec<StudentInfo>,
        chat_history: Vec<ChatBroadcast>,
        poll_bank: Vec<PollTemplate>,
    },

    StudentJoined {
        quiz_code: String,
        student_name: String,
        chat_history: Vec<ChatBroadcast>,
        active_poll: Option<ActivePollInfo>,
    },

    RosterUpdate {
        students: Vec<StudentInfo>,
    },

    PollStarted {
        question: String,
        options: Vec<String>,
        duration_secs: u64,
    },

    /// Private acknowledgment to the submitter only.
    AnswerAck {
        score: u32,
        total_answered: u32,
    },

    /// Incremental answered-count update, teacher only.
    AnswerCount {
        answered: usize,
        total: usize,
    },

    PollResults(ResultsSnapshot),

    PollBankUpdate {
        polls: Vec<PollTemplate>,
    },

    ChatMessage(ChatBroadcast),

    KickedOut,

    TeacherLeft,

    Error {
        kind: String,
        message: String,
    },
}

/// Roster entry as shown to the teacher (and to students in the chat panel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentInfo {
    pub student_id: String,
    pub student_name: String,
    pub score: u32,
    pub total_answered: u32,
    pub has_answered: bool,
    pub joined_at: DateTime<Utc>,
}

/// The currently running poll as presented to a late-joining student.
/// `remaining_secs` is clamped to zero for a poll on the verge of timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePollInfo {
    pub question: String,
    pub options: Vec<String>,
    pub remaining_secs: u64,
}

/// A chat message as broadcast to every connection in the session,
/// sender included, so all clients replay one authoritative log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBroadcast {
    pub sender_name: String,
    pub sender_role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A reusable poll definition stored in the session's poll bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTemplate {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    pub duration_secs: u64,
}

/// Per-option outcome within a results snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionResult {
    pub text: String,
    pub count: usize,
    /// Share of the roster at end time, rounded. Zero when the roster is empty.
    pub percentage: u32,
}

/// Immutable summary of an ended poll, broadcast to the whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub question: String,
    pub results: Vec<OptionResult>,
    pub correct_option: usize,
    pub total_responses: usize,
    pub total_participants: usize,
}
