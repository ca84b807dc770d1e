//! Gateway hub and its caller-facing HTTP surface

mod handler;
mod helpers;
mod hub;
mod router;
mod server;

pub use handler::RequestHandler;
pub use hub::{Gateway, ShutdownFailure, ShutdownReport};
pub use router::{AppState, SESSION_HEADER, create_router};
pub use server::GatewayServer;
