//! HTTP client for the provisioning API
//!
//! The bot never talks to Telegram's login protocol itself; every step is
//! relayed through these calls.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use tsp_core::{CredentialSummary, ProvisioningState};

use crate::error::{Result, TelegramError};

const API_KEY_HEADER: &str = "X-API-Key";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StartReply {
    pub request_id: String,
    pub state: ProvisioningState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeReply {
    pub request_id: String,
    pub state: ProvisioningState,
    pub attempts_remaining: u32,
    pub password_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    pub request_id: String,
    pub user_identity: String,
    pub state: ProvisioningState,
    pub attempts_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StartBody<'a> {
    user_identity: &'a str,
    phone_number: &'a str,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
    state: Option<ProvisioningState>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    kind: String,
    code: String,
    message: String,
}

// ============================================================================
// Client
// ============================================================================

/// Provisioning API client
#[derive(Clone)]
pub struct ProvisioningClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ProvisioningClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub async fn start(&self, user_identity: &str, phone_number: &str) -> Result<StartReply> {
        let request = self.request(Method::POST, "/sessions/start").json(&StartBody {
            user_identity,
            phone_number,
        });
        json(self.send(request).await?).await
    }

    pub async fn submit_code(&self, request_id: &str, code: &str) -> Result<ChallengeReply> {
        let request = self
            .request(Method::POST, &format!("/sessions/{}/code", request_id))
            .json(&serde_json::json!({ "code": code }));
        json(self.send(request).await?).await
    }

    pub async fn submit_password(&self, request_id: &str, password: &str) -> Result<ChallengeReply> {
        let request = self
            .request(Method::POST, &format!("/sessions/{}/password", request_id))
            .json(&serde_json::json!({ "password": password }));
        json(self.send(request).await?).await
    }

    pub async fn status(&self, request_id: &str) -> Result<StatusReply> {
        let request = self.request(Method::GET, &format!("/sessions/{}", request_id));
        json(self.send(request).await?).await
    }

    pub async fn cancel(&self, request_id: &str) -> Result<StatusReply> {
        let request = self.request(Method::DELETE, &format!("/sessions/{}", request_id));
        json(self.send(request).await?).await
    }

    pub async fn list_credentials(&self) -> Result<Vec<CredentialSummary>> {
        let request = self.request(Method::GET, "/credentials");
        json(self.send(request).await?).await
    }

    pub async fn revoke(&self, user_identity: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/credentials/{}", user_identity));
        self.send(request).await?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// Send and turn non-success answers into [`TelegramError::Api`]
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("Provisioning API answered {}: {}", status, body);
        Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => TelegramError::Api {
                status: status.as_u16(),
                kind: envelope.error.kind,
                code: envelope.error.code,
                message: envelope.error.message,
                state: envelope.state,
            },
            Err(_) => TelegramError::Api {
                status: status.as_u16(),
                kind: "internal".to_string(),
                code: "Unexpected".to_string(),
                message: format!("unexpected answer ({})", status),
                state: None,
            },
        })
    }
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(response.json().await?)
}
