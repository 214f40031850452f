//! Reference HTTP host exposing the guard over a small auth API.

pub mod handlers;
mod routes;
mod state;

pub use routes::router;
pub use state::AppState;
