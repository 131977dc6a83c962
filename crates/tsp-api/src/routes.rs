//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    cancel_session, delete_credential, get_credential, health, list_credentials, session_status,
    start_session, submit_code, submit_password,
};
use crate::server::AppState;

/// Routes that require the API key
pub fn routes() -> Router<AppState> {
    Router::new()
        // Provisioning flow
        .route("/sessions/start", post(start_session))
        .route("/sessions/{request_id}", get(session_status).delete(cancel_session))
        .route("/sessions/{request_id}/code", post(submit_code))
        .route("/sessions/{request_id}/password", post(submit_password))
        // Credential store
        .route("/credentials", get(list_credentials))
        .route(
            "/credentials/{user_identity}",
            get(get_credential).delete(delete_credential),
        )
}

/// Unauthenticated routes
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
