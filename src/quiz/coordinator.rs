use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::connections::ConnectionRegistry;
use super::messages::{ActivePollInfo, ChatBroadcast, ClientMessage, PollTemplate, ServerMessage};
use super::poll::Poll;
use super::registry::SessionRegistry;
use super::session::{Role, Session};
use super::timer::TimerService;
use crate::error::{QuizError, Result};

/// One computed notification: which connection gets which message.
#[derive(Debug)]
pub struct Outbound {
    pub target: String,
    pub message: ServerMessage,
}

impl Outbound {
    fn new(target: impl Into<String>, message: ServerMessage) -> Self {
        Self { target: target.into(), message }
    }
}

/// Event-driven façade over the registries. Every action locks exactly one
/// session, computes a batch of outbound notifications, and hands the batch
/// to a separate delivery step, so the state transitions stay testable
/// without a transport.
///
/// Cloning yields another handle onto the same registries; the poll timer
/// tasks each hold one.
#[derive(Clone)]
pub struct SessionCoordinator {
    sessions: Arc<SessionRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl SessionCoordinator {
    pub fn new(sessions: Arc<SessionRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self { sessions, connections }
    }

    /// Transport entry point: dispatches an inbound action and delivers its
    /// effects. Expected failures go back to the originating connection only,
    /// as a structured error notification.
    pub async fn handle_message(&self, connection_id: &str, message: ClientMessage) {
        match self.dispatch(connection_id, message).await {
            Ok(batch) => self.deliver(batch).await,
            Err(err) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %err,
                    "Rejected client action"
                );
                self.connections
                    .send(
                        connection_id,
                        ServerMessage::Error {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        },
                    )
                    .await;
            }
        }
    }

    async fn dispatch(&self, connection_id: &str, message: ClientMessage) -> Result<Vec<Outbound>> {
        match message {
            ClientMessage::TeacherJoin { quiz_code } => self.teacher_join(connection_id, &quiz_code).await,
            ClientMessage::StudentJoin { student_name, quiz_code } => {
                self.student_join(connection_id, &student_name, &quiz_code).await
            }
            ClientMessage::CreatePoll { question, options, correct_option, duration_secs } => {
                self.create_poll(connection_id, question, options, correct_option, duration_secs)
                    .await
            }
            ClientMessage::SubmitAnswer { option_index } => {
                self.submit_answer(connection_id, option_index).await
            }
            ClientMessage::EndPoll => self.end_poll(connection_id).await,
            ClientMessage::SavePoll { question, options, correct_option, duration_secs } => {
                self.save_poll(
                    connection_id,
                    PollTemplate { question, options, correct_option, duration_secs },
                )
                .await
            }
            ClientMessage::StartSavedPoll { index } => self.start_saved_poll(connection_id, index).await,
            ClientMessage::KickStudent { student_id } => self.kick_student(connection_id, &student_id).await,
            ClientMessage::ChatMessage { text } => self.chat_message(connection_id, &text).await,
        }
    }

    /// Queues a computed batch onto the per-connection outbound channels.
    /// Sends never block; a closed connection is simply skipped.
    pub async fn deliver(&self, batch: Vec<Outbound>) {
        for outbound in batch {
            self.connections.send(&outbound.target, outbound.message).await;
        }
    }

    pub async fn teacher_join(&self, connection_id: &str, quiz_code: &str) -> Result<Vec<Outbound>> {
        let session = self
            .sessions
            .find(quiz_code)
            .await
            .ok_or_else(|| QuizError::SessionNotFound(quiz_code.to_string()))?;

        let message = {
            let mut s = session.lock().await;
            s.bind_teacher(connection_id);
            tracing::info!(
                session_code = %s.code,
                connection_id = %connection_id,
                "Teacher joined session"
            );
            ServerMessage::TeacherJoined {
                quiz_code: s.code.clone(),
                students: s.roster(),
                chat_history: s.chat_log.clone(),
                poll_bank: s.poll_bank.clone(),
            }
        };

        self.connections
            .bind(connection_id, &quiz_code.to_uppercase(), Role::Teacher)
            .await;

        Ok(vec![Outbound::new(connection_id, message)])
    }

    pub async fn student_join(
        &self,
        connection_id: &str,
        student_name: &str,
        quiz_code: &str,
    ) -> Result<Vec<Outbound>> {
        let session = self
            .sessions
            .find(quiz_code)
            .await
            .ok_or_else(|| QuizError::SessionNotFound(quiz_code.to_string()))?;

        let mut batch = Vec::new();
        {
            let mut s = session.lock().await;
            s.add_participant(connection_id, student_name)?;

            tracing::info!(
                session_code = %s.code,
                connection_id = %connection_id,
                student_name = %student_name,
                "Student joined session"
            );

            let active_poll = s.current_poll.as_ref().map(|poll| ActivePollInfo {
                question: poll.question.clone(),
                options: poll.options.clone(),
                remaining_secs: poll.remaining_secs(Utc::now()),
            });

            batch.push(Outbound::new(
                connection_id,
                ServerMessage::StudentJoined {
                    quiz_code: s.code.clone(),
                    student_name: student_name.to_string(),
                    chat_history: s.chat_log.clone(),
                    active_poll,
                },
            ));

            if let Some(teacher) = &s.teacher {
                batch.push(Outbound::new(
                    teacher,
                    ServerMessage::RosterUpdate { students: s.roster() },
                ));
            }
        }

        self.connections
            .bind(connection_id, &quiz_code.to_uppercase(), Role::Student)
            .await;

        Ok(batch)
    }

    pub async fn create_poll(
        &self,
        connection_id: &str,
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    ) -> Result<Vec<Outbound>> {
        let (code, session) = self.teacher_session(connection_id).await?;
        let mut s = session.lock().await;
        if !s.is_teacher(connection_id) {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        self.begin_poll(&code, &mut s, connection_id, question, options, correct_option, duration_secs)
    }

    /// Activates a poll on an already locked session and schedules its
    /// timeout. Shared between ad-hoc polls and banked templates.
    #[allow(clippy::too_many_arguments)]
    fn begin_poll(
        &self,
        code: &str,
        s: &mut Session,
        teacher_id: &str,
        question: String,
        options: Vec<String>,
        correct_option: usize,
        duration_secs: u64,
    ) -> Result<Vec<Outbound>> {
        let seq = s.start_poll(question.clone(), options.clone(), correct_option, duration_secs)?;

        let handle = TimerService::schedule(self.clone(), code.to_string(), seq, duration_secs);
        s.set_timer(handle);

        tracing::info!(
            session_code = %code,
            poll_seq = seq,
            duration_secs = duration_secs,
            "Poll started"
        );

        let students = s.student_connection_ids();
        let total = students.len();
        let mut batch: Vec<Outbound> = students
            .into_iter()
            .map(|id| {
                Outbound::new(
                    id,
                    ServerMessage::PollStarted {
                        question: question.clone(),
                        options: options.clone(),
                        duration_secs,
                    },
                )
            })
            .collect();
        batch.push(Outbound::new(
            teacher_id,
            ServerMessage::AnswerCount { answered: 0, total },
        ));
        Ok(batch)
    }

    pub async fn submit_answer(&self, connection_id: &str, option_index: usize) -> Result<Vec<Outbound>> {
        let (code, role) = self
            .connections
            .binding(connection_id)
            .await
            .ok_or_else(|| QuizError::Unauthorized(connection_id.to_string()))?;
        if role != Role::Student {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        let session = self
            .sessions
            .find(&code)
            .await
            .ok_or_else(|| QuizError::SessionNotFound(code.clone()))?;

        let mut s = session.lock().await;
        let update = s.submit_answer(connection_id, option_index)?;

        let mut batch = vec![Outbound::new(
            connection_id,
            ServerMessage::AnswerAck {
                score: update.score,
                total_answered: update.total_answered,
            },
        )];
        if let Some(teacher) = &s.teacher {
            batch.push(Outbound::new(
                teacher,
                ServerMessage::AnswerCount {
                    answered: update.answered_count,
                    total: update.participant_count,
                },
            ));
        }
        Ok(batch)
    }

    pub async fn end_poll(&self, connection_id: &str) -> Result<Vec<Outbound>> {
        let (code, session) = self.teacher_session(connection_id).await?;
        let mut s = session.lock().await;
        if !s.is_teacher(connection_id) {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        s.cancel_timer();
        let snapshot = s.end_poll()?;
        tracing::info!(session_code = %code, "Poll ended by teacher");
        Ok(Self::broadcast_results(&s, snapshot))
    }

    /// Timer-fired end. Equivalent to the teacher ending the poll, except a
    /// stale fire (poll already ended, or a newer poll running) is a silent
    /// no-op rather than an error.
    pub async fn poll_timeout(&self, session_code: &str, poll_seq: u64) -> Vec<Outbound> {
        let Some(session) = self.sessions.find(session_code).await else {
            return Vec::new();
        };

        let mut s = session.lock().await;
        if s.current_poll.as_ref().map(|p| p.seq) != Some(poll_seq) {
            tracing::debug!(
                session_code = %session_code,
                poll_seq = poll_seq,
                "Stale poll timer ignored"
            );
            return Vec::new();
        }

        s.clear_timer();
        let Ok(snapshot) = s.end_poll() else {
            return Vec::new();
        };
        tracing::info!(session_code = %session_code, poll_seq = poll_seq, "Poll timed out");
        Self::broadcast_results(&s, snapshot)
    }

    fn broadcast_results(s: &Session, snapshot: super::messages::ResultsSnapshot) -> Vec<Outbound> {
        s.connection_ids()
            .into_iter()
            .map(|id| Outbound::new(id, ServerMessage::PollResults(snapshot.clone())))
            .collect()
    }

    pub async fn save_poll(&self, connection_id: &str, template: PollTemplate) -> Result<Vec<Outbound>> {
        Poll::validate(
            &template.question,
            &template.options,
            template.correct_option,
            template.duration_secs,
        )?;

        let (code, session) = self.teacher_session(connection_id).await?;
        let mut s = session.lock().await;
        if !s.is_teacher(connection_id) {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        s.poll_bank.push(template);
        tracing::debug!(
            session_code = %code,
            bank_size = s.poll_bank.len(),
            "Poll template saved"
        );
        Ok(vec![Outbound::new(
            connection_id,
            ServerMessage::PollBankUpdate { polls: s.poll_bank.clone() },
        )])
    }

    pub async fn start_saved_poll(&self, connection_id: &str, index: usize) -> Result<Vec<Outbound>> {
        let (code, session) = self.teacher_session(connection_id).await?;
        let mut s = session.lock().await;
        if !s.is_teacher(connection_id) {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        let template = s
            .poll_bank
            .get(index)
            .cloned()
            .ok_or_else(|| QuizError::NotFound(format!("poll template {}", index)))?;

        self.begin_poll(
            &code,
            &mut s,
            connection_id,
            template.question,
            template.options,
            template.correct_option,
            template.duration_secs,
        )
    }

    /// Removes a participant at the teacher's request. Anything that does not
    /// line up (caller not the bound teacher, target not in the roster) is a
    /// silent no-op. The transport closes the target's socket after the
    /// terminal notification is flushed.
    pub async fn kick_student(&self, connection_id: &str, student_id: &str) -> Result<Vec<Outbound>> {
        let Some((code, Role::Teacher)) = self.connections.binding(connection_id).await else {
            return Ok(Vec::new());
        };
        let Some(session) = self.sessions.find(&code).await else {
            return Ok(Vec::new());
        };

        let mut s = session.lock().await;
        if !s.is_teacher(connection_id) {
            return Ok(Vec::new());
        }
        let Some(participant) = s.remove_participant(student_id) else {
            return Ok(Vec::new());
        };

        tracing::info!(
            session_code = %code,
            student_id = %student_id,
            student_name = %participant.student_name,
            "Student kicked from session"
        );

        let mut batch = vec![Outbound::new(student_id, ServerMessage::KickedOut)];
        let roster = s.roster();
        for id in s.connection_ids() {
            batch.push(Outbound::new(
                id,
                ServerMessage::RosterUpdate { students: roster.clone() },
            ));
        }
        Ok(batch)
    }

    /// Appends to the session's chat log and fans the message out to every
    /// connection, sender included, so all clients replay one authoritative
    /// log. Blank messages are dropped.
    pub async fn chat_message(&self, connection_id: &str, text: &str) -> Result<Vec<Outbound>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let (code, role) = self
            .connections
            .binding(connection_id)
            .await
            .ok_or_else(|| QuizError::Unauthorized(connection_id.to_string()))?;
        let session = self
            .sessions
            .find(&code)
            .await
            .ok_or_else(|| QuizError::SessionNotFound(code.clone()))?;

        let mut s = session.lock().await;
        let sender_name = match role {
            Role::Teacher => "Teacher".to_string(),
            Role::Student => s
                .participant(connection_id)
                .map(|p| p.student_name.clone())
                .ok_or_else(|| QuizError::NotFound(connection_id.to_string()))?,
        };

        let message = ChatBroadcast {
            sender_name,
            sender_role: role,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        s.push_chat(message.clone());

        Ok(s
            .connection_ids()
            .into_iter()
            .map(|id| Outbound::new(id, ServerMessage::ChatMessage(message.clone())))
            .collect())
    }

    /// Connection teardown. A departing teacher tears the whole session down;
    /// a departing student just leaves the roster. Safe to call for
    /// connections that never joined anything.
    pub async fn disconnect(&self, connection_id: &str) -> Vec<Outbound> {
        let Some(info) = self.connections.remove(connection_id).await else {
            return Vec::new();
        };
        let (Some(code), Some(role)) = (info.session_code, info.role) else {
            return Vec::new();
        };
        let Some(session) = self.sessions.find(&code).await else {
            return Vec::new();
        };

        match role {
            Role::Teacher => {
                let batch = {
                    let mut s = session.lock().await;
                    // A rebound session survives its former teacher's socket
                    if !s.is_teacher(connection_id) {
                        return Vec::new();
                    }
                    s.cancel_timer();
                    s.student_connection_ids()
                        .into_iter()
                        .map(|id| Outbound::new(id, ServerMessage::TeacherLeft))
                        .collect()
                };
                self.sessions.remove(&code).await;
                tracing::info!(
                    session_code = %code,
                    connection_id = %connection_id,
                    "Teacher disconnected, session closed"
                );
                batch
            }
            Role::Student => {
                let mut s = session.lock().await;
                if s.remove_participant(connection_id).is_none() {
                    return Vec::new();
                }
                tracing::info!(
                    session_code = %code,
                    connection_id = %connection_id,
                    "Student disconnected"
                );
                let roster = s.roster();
                s.connection_ids()
                    .into_iter()
                    .map(|id| Outbound::new(id, ServerMessage::RosterUpdate { students: roster.clone() }))
                    .collect()
            }
        }
    }

    async fn teacher_session(
        &self,
        connection_id: &str,
    ) -> Result<(String, Arc<Mutex<Session>>)> {
        let (code, role) = self
            .connections
            .binding(connection_id)
            .await
            .ok_or_else(|| QuizError::Unauthorized(connection_id.to_string()))?;
        if role != Role::Teacher {
            return Err(QuizError::Unauthorized(connection_id.to_string()));
        }

        let session = self
            .sessions
            .find(&code)
            .await
            .ok_or_else(|| QuizError::SessionNotFound(code.clone()))?;
        Ok((code, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::session::SessionConfig;
    use tokio::sync::mpsc;

    struct Harness {
        coordinator: SessionCoordinator,
        sessions: Arc<SessionRegistry>,
        connections: Arc<ConnectionRegistry>,
    }

    fn harness() -> Harness {
        let sessions = SessionRegistry::new();
        let connections = ConnectionRegistry::new();
        let coordinator = SessionCoordinator::new(sessions.clone(), connections.clone());
        Harness { coordinator, sessions, connections }
    }

    impl Harness {
        async fn create_session(&self, max_participants: usize, allow_late_join: bool) -> String {
            self.sessions
                .create(SessionConfig {
                    title: "Geography".to_string(),
                    description: String::new(),
                    max_participants,
                    allow_late_join,
                })
                .await
                .unwrap()
        }

        async fn connect(&self, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.connections.register(id.to_string(), tx).await;
            rx
        }

        async fn join_teacher(&self, id: &str, code: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
            let rx = self.connect(id).await;
            self.coordinator.teacher_join(id, code).await.unwrap();
            rx
        }

        async fn join_student(
            &self,
            id: &str,
            name: &str,
            code: &str,
        ) -> mpsc::UnboundedReceiver<ServerMessage> {
            let rx = self.connect(id).await;
            self.coordinator.student_join(id, name, code).await.unwrap();
            rx
        }
    }

    fn count_poll_results(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> usize {
        let mut count = 0;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, ServerMessage::PollResults(_)) {
                count += 1;
            }
        }
        count
    }

    fn paris_london() -> Vec<String> {
        vec!["Paris".to_string(), "London".to_string()]
    }

    #[tokio::test]
    async fn test_teacher_join_unknown_code() {
        let h = harness();
        let _rx = h.connect("conn-t").await;
        let result = h.coordinator.teacher_join("conn-t", "NOPE99").await;
        assert!(matches!(result, Err(QuizError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_student_join_case_insensitive_code() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _rx = h.connect("conn-s").await;
        let batch = h
            .coordinator
            .student_join("conn-s", "Ada", &code.to_lowercase())
            .await
            .unwrap();
        assert!(matches!(
            batch[0].message,
            ServerMessage::StudentJoined { .. }
        ));
    }

    #[tokio::test]
    async fn test_session_full() {
        let h = harness();
        let code = h.create_session(2, true).await;
        let _a = h.join_student("conn-a", "A", &code).await;
        let _b = h.join_student("conn-b", "B", &code).await;

        let _rx = h.connect("conn-c").await;
        let result = h.coordinator.student_join("conn-c", "C", &code).await;
        assert!(matches!(result, Err(QuizError::SessionFull(_))));

        // The rejected student never made it onto the roster
        let session = h.sessions.find(&code).await.unwrap();
        assert_eq!(session.lock().await.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_student_join_notifies_teacher() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;

        let batch = {
            let _rx = h.connect("conn-s").await;
            h.coordinator.student_join("conn-s", "Ada", &code).await.unwrap()
        };
        let roster = batch.iter().find(|o| o.target == "conn-t").unwrap();
        match &roster.message {
            ServerMessage::RosterUpdate { students } => {
                assert_eq!(students.len(), 1);
                assert_eq!(students[0].student_name, "Ada");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_poll_requires_teacher() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _rx = h.join_student("conn-s", "Ada", &code).await;

        let result = h
            .coordinator
            .create_poll("conn-s", "q".to_string(), paris_london(), 0, 30)
            .await;
        assert!(matches!(result, Err(QuizError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_scoring_scenario() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;
        let _b = h.join_student("conn-b", "B", &code).await;

        let batch = h
            .coordinator
            .create_poll("conn-t", "Capital of France?".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();
        // Both students get the poll, teacher gets the zero count
        assert_eq!(batch.len(), 3);

        let batch = h.coordinator.submit_answer("conn-a", 0).await.unwrap();
        let ack = batch.iter().find(|o| o.target == "conn-a").unwrap();
        assert!(matches!(
            ack.message,
            ServerMessage::AnswerAck { score: 1, total_answered: 1 }
        ));
        let count = batch.iter().find(|o| o.target == "conn-t").unwrap();
        assert!(matches!(
            count.message,
            ServerMessage::AnswerCount { answered: 1, total: 2 }
        ));

        let batch = h.coordinator.submit_answer("conn-b", 1).await.unwrap();
        let ack = batch.iter().find(|o| o.target == "conn-b").unwrap();
        assert!(matches!(
            ack.message,
            ServerMessage::AnswerAck { score: 0, total_answered: 1 }
        ));

        let batch = h.coordinator.end_poll("conn-t").await.unwrap();
        // Teacher and both students receive the snapshot
        assert_eq!(batch.len(), 3);
        let ServerMessage::PollResults(snapshot) = &batch[0].message else {
            panic!("expected poll results");
        };
        assert_eq!(snapshot.correct_option, 0);
        assert_eq!(snapshot.results[0].count, 1);
        assert_eq!(snapshot.results[0].percentage, 50);
        assert_eq!(snapshot.results[1].count, 1);
        assert_eq!(snapshot.results[1].percentage, 50);
    }

    #[tokio::test]
    async fn test_duplicate_answer_rejected() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        h.coordinator.submit_answer("conn-a", 1).await.unwrap();
        let retry = h.coordinator.submit_answer("conn-a", 0).await;
        assert!(matches!(retry, Err(QuizError::AlreadyAnswered)));

        // Score reflects only the first submission
        let batch = h.coordinator.end_poll("conn-t").await.unwrap();
        let ServerMessage::PollResults(snapshot) = &batch[0].message else {
            panic!("expected poll results");
        };
        assert_eq!(snapshot.results[1].count, 1);
        assert_eq!(snapshot.results[0].count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_submissions() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = h.coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.submit_answer("conn-a", 0).await.is_ok()
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_poll_exactly_one_wins() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;

        let first = h.coordinator.clone();
        let second = h.coordinator.clone();
        let t1 = tokio::spawn(async move {
            first
                .create_poll("conn-t", "q1".to_string(), paris_london(), 0, 30)
                .await
                .is_ok()
        });
        let t2 = tokio::spawn(async move {
            second
                .create_poll("conn-t", "q2".to_string(), paris_london(), 0, 30)
                .await
                .is_ok()
        });

        let wins = [t1.await.unwrap(), t2.await.unwrap()]
            .iter()
            .filter(|&&ok| ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let mut student_rx = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 5)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(6)).await;

        assert_eq!(count_poll_results(&mut student_rx), 1);
        // The poll is gone, a manual end now reports no active poll
        let result = h.coordinator.end_poll("conn-t").await;
        assert!(matches!(result, Err(QuizError::NoActivePoll)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_end_cancels_timer() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let mut student_rx = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 5)
            .await
            .unwrap();
        let batch = h.coordinator.end_poll("conn-t").await.unwrap();
        h.coordinator.deliver(batch).await;

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        // Exactly one results broadcast: manual end won, the timer was a no-op
        assert_eq!(count_poll_results(&mut student_rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_cannot_end_newer_poll() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let mut student_rx = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q1".to_string(), paris_london(), 0, 5)
            .await
            .unwrap();
        h.coordinator.end_poll("conn-t").await.unwrap();

        // A newer poll outliving the first poll's deadline must stay active
        h.coordinator
            .create_poll("conn-t", "q2".to_string(), paris_london(), 0, 100)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(20)).await;

        assert_eq!(count_poll_results(&mut student_rx), 0);
        assert!(h.coordinator.end_poll("conn-t").await.is_ok());
    }

    #[tokio::test]
    async fn test_late_join_receives_active_poll() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        let _rx = h.connect("conn-late").await;
        let batch = h
            .coordinator
            .student_join("conn-late", "Late", &code)
            .await
            .unwrap();
        let joined = batch.iter().find(|o| o.target == "conn-late").unwrap();
        match &joined.message {
            ServerMessage::StudentJoined { active_poll: Some(poll), .. } => {
                assert_eq!(poll.question, "q");
                assert!(poll.remaining_secs <= 30);
            }
            other => panic!("expected active poll, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_join_disabled() {
        let h = harness();
        let code = h.create_session(50, false).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        let _rx = h.connect("conn-late").await;
        let result = h.coordinator.student_join("conn-late", "Late", &code).await;
        assert!(matches!(result, Err(QuizError::QuizInactive(_))));
    }

    #[tokio::test]
    async fn test_kick_removes_student() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;
        let _b = h.join_student("conn-b", "B", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        let batch = h.coordinator.kick_student("conn-t", "conn-a").await.unwrap();
        assert!(batch
            .iter()
            .any(|o| o.target == "conn-a" && matches!(o.message, ServerMessage::KickedOut)));

        // No silent score change: the kicked connection can no longer answer
        let result = h.coordinator.submit_answer("conn-a", 0).await;
        assert!(matches!(result, Err(QuizError::NotFound(_))));

        let session = h.sessions.find(&code).await.unwrap();
        assert_eq!(session.lock().await.participant_count(), 1);
    }

    #[tokio::test]
    async fn test_kick_by_non_teacher_is_noop() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;
        let _b = h.join_student("conn-b", "B", &code).await;

        let batch = h.coordinator.kick_student("conn-a", "conn-b").await.unwrap();
        assert!(batch.is_empty());

        let session = h.sessions.find(&code).await.unwrap();
        assert_eq!(session.lock().await.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_kick_unknown_target_is_noop() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;

        let batch = h.coordinator.kick_student("conn-t", "conn-ghost").await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_chat_broadcast_includes_sender() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "Ada", &code).await;

        let batch = h.coordinator.chat_message("conn-a", "hello").await.unwrap();
        let targets: Vec<_> = batch.iter().map(|o| o.target.as_str()).collect();
        assert!(targets.contains(&"conn-a"));
        assert!(targets.contains(&"conn-t"));

        let ServerMessage::ChatMessage(chat) = &batch[0].message else {
            panic!("expected chat message");
        };
        assert_eq!(chat.sender_name, "Ada");
        assert_eq!(chat.sender_role, Role::Student);

        // History is replayed to late joiners
        let _rx = h.connect("conn-b").await;
        let batch = h.coordinator.student_join("conn-b", "B", &code).await.unwrap();
        let joined = batch.iter().find(|o| o.target == "conn-b").unwrap();
        match &joined.message {
            ServerMessage::StudentJoined { chat_history, .. } => {
                assert_eq!(chat_history.len(), 1);
                assert_eq!(chat_history[0].text, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_chat_dropped() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _a = h.join_student("conn-a", "Ada", &code).await;
        let batch = h.coordinator.chat_message("conn-a", "   ").await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_teacher_disconnect_tears_down_session() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;

        h.coordinator
            .create_poll("conn-t", "q".to_string(), paris_london(), 0, 30)
            .await
            .unwrap();

        let batch = h.coordinator.disconnect("conn-t").await;
        assert!(batch
            .iter()
            .any(|o| o.target == "conn-a" && matches!(o.message, ServerMessage::TeacherLeft)));
        assert!(h.sessions.find(&code).await.is_none());
    }

    #[tokio::test]
    async fn test_student_disconnect_updates_roster() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;
        let _b = h.join_student("conn-b", "B", &code).await;

        let batch = h.coordinator.disconnect("conn-a").await;
        let roster = batch.iter().find(|o| o.target == "conn-t").unwrap();
        match &roster.message {
            ServerMessage::RosterUpdate { students } => {
                assert_eq!(students.len(), 1);
                assert_eq!(students[0].student_name, "B");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_superseded_teacher_cannot_control_or_tear_down() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _t1 = h.join_teacher("conn-t1", &code).await;
        let _t2 = h.join_teacher("conn-t2", &code).await;

        let result = h
            .coordinator
            .create_poll("conn-t1", "q".to_string(), paris_london(), 0, 30)
            .await;
        assert!(matches!(result, Err(QuizError::Unauthorized(_))));

        let batch = h.coordinator.disconnect("conn-t1").await;
        assert!(batch.is_empty());
        assert!(h.sessions.find(&code).await.is_some());
    }

    #[tokio::test]
    async fn test_poll_bank_round_trip() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;
        let _a = h.join_student("conn-a", "A", &code).await;

        let template = PollTemplate {
            question: "Capital of France?".to_string(),
            options: paris_london(),
            correct_option: 0,
            duration_secs: 30,
        };
        h.coordinator.save_poll("conn-t", template.clone()).await.unwrap();

        let batch = h.coordinator.start_saved_poll("conn-t", 0).await.unwrap();
        let started = batch.iter().find(|o| o.target == "conn-a").unwrap();
        match &started.message {
            ServerMessage::PollStarted { question, options, duration_secs } => {
                assert_eq!(question, &template.question);
                assert_eq!(options, &template.options);
                assert_eq!(*duration_secs, template.duration_secs);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let session = h.sessions.find(&code).await.unwrap();
        let s = session.lock().await;
        let poll = s.current_poll.as_ref().unwrap();
        assert_eq!(poll.correct_option, template.correct_option);
    }

    #[tokio::test]
    async fn test_start_saved_poll_bad_index() {
        let h = harness();
        let code = h.create_session(50, true).await;
        let _teacher_rx = h.join_teacher("conn-t", &code).await;

        let result = h.coordinator.start_saved_poll("conn-t", 3).await;
        assert!(matches!(result, Err(QuizError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_handle_message_routes_errors_to_sender() {
        let h = harness();
        let mut rx = h.connect("conn-x").await;
        h.coordinator
            .handle_message(
                "conn-x",
                ClientMessage::TeacherJoin { quiz_code: "NOPE99".to_string() },
            )
            .await;

        match rx.recv().await {
            Some(ServerMessage::Error { kind, .. }) => assert_eq!(kind, "session-not-found"),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
