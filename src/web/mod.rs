//! Web server module (Axum + API).

pub mod api;
pub mod response;
pub mod router;
pub mod server;

pub use server::{build_app, run_server};
