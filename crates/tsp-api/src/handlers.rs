//! HTTP API handlers
//!
//! Request handlers for session provisioning and credential access.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tsp_core::{
    AccountInfo, ChallengeResult, CredentialSummary, ProvisioningState, RequestId, RequestStatus,
    UserIdentity,
};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Start request payload
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_identity: String,
    pub phone_number: String,
}

/// Start response payload
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub request_id: RequestId,
    pub state: ProvisioningState,
}

/// Code submission payload
#[derive(Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Password submission payload
#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Stored credential with its session blob, for internal consumers
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub user_identity: UserIdentity,
    pub phone_number: String,
    pub issued_at: DateTime<Utc>,
    pub account: Option<AccountInfo>,
    /// Base64 session blob
    pub session_blob: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_requests: usize,
}

// ============================================================================
// Helpers
// ============================================================================

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))
}

fn request_id(raw: &str) -> Result<RequestId> {
    RequestId::parse(raw).ok_or_else(|| ApiError::NotFound(format!("unknown request {}", raw)))
}

fn identity(raw: &str) -> Result<UserIdentity> {
    UserIdentity::parse(raw).map_err(|_| ApiError::NotFound(format!("no credential stored for {}", raw)))
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_requests: state.provisioner.active_count(),
    })
}

/// Begin provisioning for an identity
pub async fn start_session(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>> {
    let body = json_body(payload)?;
    debug!("Start request for {}", body.user_identity);

    let request_id = state
        .provisioner
        .start(&body.user_identity, &body.phone_number)
        .await?;
    info!("Provisioning request {} started", request_id);

    Ok(Json(StartResponse {
        request_id,
        state: ProvisioningState::AwaitingCode,
    }))
}

/// Submit the login code
pub async fn submit_code(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<ChallengeResult>> {
    let request_id = request_id(&raw_id)?;
    let body = json_body(payload)?;

    let result = state.provisioner.submit_code(request_id, &body.code).await?;
    Ok(Json(result))
}

/// Submit the two-factor password
pub async fn submit_password(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: std::result::Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<ChallengeResult>> {
    let request_id = request_id(&raw_id)?;
    let body = json_body(payload)?;

    let result = state
        .provisioner
        .submit_password(request_id, &body.password)
        .await?;
    Ok(Json(result))
}

/// Current status of a request
pub async fn session_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<RequestStatus>> {
    let request_id = request_id(&raw_id)?;
    Ok(Json(state.provisioner.status(request_id).await?))
}

/// Abandon a request in progress
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<RequestStatus>> {
    let request_id = request_id(&raw_id)?;
    let status = state.provisioner.cancel(request_id).await?;
    info!("Provisioning request {} cancelled", request_id);
    Ok(Json(status))
}

/// List stored credentials without their blobs
pub async fn list_credentials(State(state): State<AppState>) -> Result<Json<Vec<CredentialSummary>>> {
    Ok(Json(state.store.list().await?))
}

/// Fetch one credential including its session blob
pub async fn get_credential(
    State(state): State<AppState>,
    Path(raw_identity): Path<String>,
) -> Result<Json<CredentialResponse>> {
    let identity = identity(&raw_identity)?;
    let credential = state.store.get(&identity).await?;
    debug!("Credential for {} handed out", identity);

    Ok(Json(CredentialResponse {
        phone_number: credential.phone_number.as_str().to_string(),
        session_blob: STANDARD.encode(credential.session_blob.as_slice()),
        user_identity: credential.user_identity,
        issued_at: credential.issued_at,
        account: credential.account,
    }))
}

/// Revoke a stored credential
pub async fn delete_credential(
    State(state): State<AppState>,
    Path(raw_identity): Path<String>,
) -> Result<StatusCode> {
    // Unparseable identities cannot have a record, so deleting is a no-op
    if let Ok(identity) = UserIdentity::parse(&raw_identity) {
        state.store.delete(&identity).await?;
        info!("Credential for {} deleted", identity);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_rejects_garbage() {
        assert!(matches!(request_id("not-a-uuid"), Err(ApiError::NotFound(_))));
        let id = RequestId::new();
        assert_eq!(request_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_start_response_serializes_state() {
        let response = StartResponse {
            request_id: RequestId::new(),
            state: ProvisioningState::AwaitingCode,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["state"], "awaiting_code");
    }
}
