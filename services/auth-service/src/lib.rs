pub mod app;
pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod refresh_store;
pub mod session_handlers;
pub mod user_handlers;
pub mod users;

pub use app::{build_router, AppState};
