//! Thin HTTP transport adapter: handlers call directly into the core
//! components, no business logic lives here.

/// Shared application state.
pub mod state;
/// Route definitions and handlers.
pub mod routes;

pub use routes::router;
pub use state::AppState;
