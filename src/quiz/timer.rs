use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::coordinator::SessionCoordinator;

/// Schedules the one-shot timeout task for an active poll.
///
/// The returned handle is stored on the session and aborted when the poll is
/// ended manually. A fire that loses the race against a manual end (or that
/// outlives its poll entirely) is a silent no-op inside `poll_timeout`, keyed
/// on the poll sequence number.
pub struct TimerService;

impl TimerService {
    pub fn schedule(
        coordinator: SessionCoordinator,
        session_code: String,
        poll_seq: u64,
        duration_secs: u64,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration_secs)).await;
            tracing::debug!(
                session_code = %session_code,
                poll_seq = poll_seq,
                "Poll timer fired"
            );
            let batch = coordinator.poll_timeout(&session_code, poll_seq).await;
            coordinator.deliver(batch).await;
        })
    }
}
