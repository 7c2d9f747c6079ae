pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod socketio;
pub mod state;
pub mod validation;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ServerConfig;
pub use routes::build_router;
pub use session::{SessionEvent, SessionManager};
pub use state::AppState;
