//! tsp-api: HTTP API for the Telegram session provisioner
//!
//! Exposes the provisioning steps and the credential store as JSON
//! endpoints. Built with axum for async HTTP handling.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, router, start_server};
