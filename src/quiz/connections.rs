use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};

use super::messages::ServerMessage;
use super::session::Role;

/// What the server knows about one live connection. The session code and
/// role are filled in once the connection joins a session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub session_code: Option<String>,
    pub role: Option<Role>,
}

/// Back-references only: connection id -> (session code, role, outbound
/// queue). Never owns session data. Guarded by its own lock, finer grained
/// than the per-session mutexes.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
        })
    }

    /// Server-side connection id, never taken from the client.
    pub fn generate_connection_id() -> String {
        let mut rng = rand::thread_rng();
        format!("conn-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>())
    }

    /// Registers a freshly opened connection with no session binding yet.
    pub async fn register(&self, connection_id: String, sender: mpsc::UnboundedSender<ServerMessage>) {
        let mut connections = self.connections.write().await;
        connections.insert(
            connection_id,
            ConnectionInfo { sender, session_code: None, role: None },
        );
    }

    /// Binds a registered connection to a session with a role. Rebinds on
    /// repeated joins from the same connection.
    pub async fn bind(&self, connection_id: &str, session_code: &str, role: Role) {
        let mut connections = self.connections.write().await;
        if let Some(info) = connections.get_mut(connection_id) {
            info.session_code = Some(session_code.to_uppercase());
            info.role = Some(role);
        }
    }

    pub async fn binding(&self, connection_id: &str) -> Option<(String, Role)> {
        let connections = self.connections.read().await;
        let info = connections.get(connection_id)?;
        Some((info.session_code.clone()?, info.role?))
    }

    pub async fn remove(&self, connection_id: &str) -> Option<ConnectionInfo> {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id)
    }

    /// Queues a message on the connection's outbound channel. A closed or
    /// missing connection is a normal condition, reported as `false`.
    pub async fn send(&self, connection_id: &str, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(connection_id) {
            Some(info) => info.sender.send(message).is_ok(),
            None => false,
        }
    }
}
