mod api;
mod config;
mod error;
mod quiz;

use config::Config;
use quiz::{ConnectionRegistry, SessionCoordinator, SessionRegistry};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let sessions = SessionRegistry::new();
    let connections = ConnectionRegistry::new();
    let coordinator = SessionCoordinator::new(sessions.clone(), connections.clone());

    let routes = api::quiz_routes::routes(
        coordinator,
        sessions,
        connections,
        config.limits.default_max_participants,
    );

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Quiz session server listening"
    );
    warp::serve(routes).run(config.bind_address()).await;
}
