use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::Filter;

use super::quiz_websocket;
use crate::quiz::{ConnectionRegistry, SessionConfig, SessionCoordinator, SessionRegistry};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    title: String,
    #[serde(default)]
    description: String,
    max_participants: Option<usize>,
    allow_late_join: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct JoinCheckRequest {
    student_name: String,
    quiz_code: String,
}

/// All routes of the quiz session server.
pub fn routes(
    coordinator: SessionCoordinator,
    sessions: Arc<SessionRegistry>,
    connections: Arc<ConnectionRegistry>,
    default_max_participants: usize,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    health_route()
        .or(create_session_route(sessions.clone(), default_max_participants))
        .or(join_check_route(sessions))
        .or(quiz_websocket_route(coordinator, connections))
}

pub fn quiz_websocket_route(
    coordinator: SessionCoordinator,
    connections: Arc<ConnectionRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_coordinator(coordinator))
        .and(with_connections(connections))
        .map(
            |ws: warp::ws::Ws, coordinator: SessionCoordinator, connections: Arc<ConnectionRegistry>| {
                ws.on_upgrade(move |websocket| {
                    quiz_websocket::handle_quiz_websocket(websocket, coordinator, connections)
                })
            },
        )
}

pub fn health_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "health")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "OK",
                "service": "Quiz Session Server",
                "timestamp": chrono::Utc::now().to_rfc3339()
            }))
        })
}

pub fn create_session_route(
    sessions: Arc<SessionRegistry>,
    default_max_participants: usize,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_sessions(sessions))
        .and(warp::any().map(move || default_max_participants))
        .and_then(create_session)
}

async fn create_session(
    request: CreateSessionRequest,
    sessions: Arc<SessionRegistry>,
    default_max_participants: usize,
) -> Result<impl warp::Reply, Infallible> {
    let config = SessionConfig {
        title: request.title,
        description: request.description,
        max_participants: request.max_participants.unwrap_or(default_max_participants),
        allow_late_join: request.allow_late_join.unwrap_or(true),
    };

    let (body, status) = match sessions.create(config.clone()).await {
        Ok(code) => (
            serde_json::json!({
                "success": true,
                "data": {
                    "session": {
                        "code": code,
                        "title": config.title,
                        "description": config.description,
                        "max_participants": config.max_participants,
                        "allow_late_join": config.allow_late_join
                    }
                }
            }),
            StatusCode::OK,
        ),
        Err(e) => (
            serde_json::json!({ "success": false, "message": e.to_string() }),
            StatusCode::BAD_REQUEST,
        ),
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

/// Pre-join validation so a student client can report a bad code or a full
/// session before opening the WebSocket.
pub fn join_check_route(
    sessions: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "sessions" / "join-check")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_sessions(sessions))
        .and_then(join_check)
}

async fn join_check(
    request: JoinCheckRequest,
    sessions: Arc<SessionRegistry>,
) -> Result<impl warp::Reply, Infallible> {
    if request.student_name.trim().is_empty() {
        let body = serde_json::json!({ "success": false, "message": "Student name is required" });
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::BAD_REQUEST,
        ));
    }

    let Some(session) = sessions.find(&request.quiz_code).await else {
        let body = serde_json::json!({
            "success": false,
            "message": "Session not found. Please check the code."
        });
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::NOT_FOUND,
        ));
    };

    let s = session.lock().await;
    if s.participant_count() >= s.config.max_participants {
        let body = serde_json::json!({ "success": false, "message": "Session is full" });
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::BAD_REQUEST,
        ));
    }

    let body = serde_json::json!({
        "success": true,
        "data": {
            "session": {
                "code": s.code,
                "title": s.config.title,
                "description": s.config.description
            },
            "student": { "name": request.student_name }
        }
    });
    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK))
}

fn with_sessions(
    sessions: Arc<SessionRegistry>,
) -> impl Filter<Extract = (Arc<SessionRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || sessions.clone())
}

fn with_connections(
    connections: Arc<ConnectionRegistry>,
) -> impl Filter<Extract = (Arc<ConnectionRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || connections.clone())
}

fn with_coordinator(
    coordinator: SessionCoordinator,
) -> impl Filter<Extract = (SessionCoordinator,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}
