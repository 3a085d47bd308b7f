use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};

use super::session::{Session, SessionConfig};
use crate::error::Result;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// Owns every live session, keyed by upper-cased code. Each session sits
/// behind its own mutex so unrelated sessions never contend; the outer map
/// lock is only held long enough to clone the `Arc`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Generate a random human-typeable session code
    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LEN)
            .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
            .collect()
    }

    /// Creates an empty session and returns its freshly allocated code,
    /// retrying on the (unlikely) code collision.
    pub async fn create(&self, config: SessionConfig) -> Result<String> {
        config.validate()?;

        let mut sessions = self.sessions.write().await;
        let code = loop {
            let candidate = Self::generate_code();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::new(code.clone(), config);
        sessions.insert(code.clone(), Arc::new(Mutex::new(session)));

        tracing::info!(session_code = %code, "Session created");
        Ok(code)
    }

    /// Case-insensitive lookup.
    pub async fn find(&self, code: &str) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        sessions.get(&code.to_uppercase()).cloned()
    }

    /// Removes the session and cancels any pending poll timer.
    pub async fn remove(&self, code: &str) -> Option<Arc<Mutex<Session>>> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&code.to_uppercase())
        };

        if let Some(session) = &removed {
            session.lock().await.cancel_timer();
            tracing::info!(session_code = %code.to_uppercase(), "Session removed");
        }

        removed
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}
