use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::quiz::{ClientMessage, ConnectionRegistry, ServerMessage, SessionCoordinator};

/// Runs one participant's connection: registers it, pumps the outbound
/// queue into the socket, feeds inbound actions to the coordinator, and
/// tears everything down when either side goes away.
pub async fn handle_quiz_websocket(
    websocket: WebSocket,
    coordinator: SessionCoordinator,
    connections: Arc<ConnectionRegistry>,
) {
    let connection_id = ConnectionRegistry::generate_connection_id();
    tracing::info!(connection_id = %connection_id, "New quiz WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    connections.register(connection_id.clone(), tx).await;

    // Drain the outbound queue into the socket. A terminal notification
    // (kick, session teardown) closes the socket after it is flushed.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let terminal = matches!(message, ServerMessage::KickedOut | ServerMessage::TeacherLeft);
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if ws_sender.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server message");
                    continue;
                }
            }
            if terminal {
                let _ = ws_sender.send(Message::close()).await;
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                let Ok(text) = message.to_str() else {
                    continue;
                };
                tracing::debug!(connection_id = %connection_id, "Received quiz message: {}", text);

                match serde_json::from_str::<ClientMessage>(text) {
                    Ok(client_message) => {
                        coordinator.handle_message(&connection_id, client_message).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            error = %e,
                            raw_message = %text,
                            "Failed to parse quiz message"
                        );
                        connections
                            .send(
                                &connection_id,
                                ServerMessage::Error {
                                    kind: "malformed-message".to_string(),
                                    message: "could not parse message".to_string(),
                                },
                            )
                            .await;
                    }
                }
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    let batch = coordinator.disconnect(&connection_id).await;
    coordinator.deliver(batch).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Quiz WebSocket connection closed");
}
