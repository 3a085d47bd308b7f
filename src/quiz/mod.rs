mod connections;
mod coordinator;
mod messages;
mod poll;
mod registry;
mod session;
mod timer;

pub use connections::ConnectionRegistry;
pub use coordinator::{Outbound, SessionCoordinator};
pub use messages::{ClientMessage, ServerMessage};
pub use registry::SessionRegistry;
pub use session::{Role, Session, SessionConfig};
