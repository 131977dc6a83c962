//! Telegram login over MTProto (grammers)
//!
//! Every provisioning request gets its own client with a fresh in-memory
//! session. Once sign-in succeeds the session is serialized and becomes the
//! credential blob.

use async_trait::async_trait;
use grammers_client::types::{LoginToken, PasswordToken, User};
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_mtsender::InvocationError;
use grammers_session::Session;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::types::{AuthChallenge, AuthHandshake, AuthProvider, ProviderError, ProviderResult};
use crate::credential::AccountInfo;
use crate::types::PhoneNumber;

/// MTProto-backed [`AuthProvider`]
pub struct MtprotoAuthProvider {
    api_id: i32,
    api_hash: String,
}

impl MtprotoAuthProvider {
    pub fn new(api_id: i32, api_hash: &str) -> Self {
        Self {
            api_id,
            api_hash: api_hash.to_string(),
        }
    }

    async fn connect(&self) -> ProviderResult<Client> {
        let config = Config {
            session: Session::new(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams {
                device_model: "tsp-gateway".to_string(),
                system_version: "1.0".to_string(),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                system_lang_code: "en".to_string(),
                lang_code: "en".to_string(),
                ..Default::default()
            },
        };

        Client::connect(config)
            .await
            .map_err(|e| ProviderError::transient(format!("connect failed: {}", e)))
    }
}

#[async_trait]
impl AuthProvider for MtprotoAuthProvider {
    fn name(&self) -> &'static str {
        "mtproto"
    }

    async fn send_code(&self, phone: &PhoneNumber) -> ProviderResult<Box<dyn AuthHandshake>> {
        let client = self.connect().await?;
        let token = client
            .request_login_code(phone.as_str())
            .await
            .map_err(|e| {
                let err = ProviderError::from_message(&e.to_string());
                warn!("auth.sendCode for {} failed: {}", phone.masked(), e);
                err
            })?;
        info!("Login code requested for {}", phone.masked());

        Ok(Box::new(MtprotoHandshake {
            client,
            login: Mutex::new(Some(token)),
            password: Mutex::new(None),
        }))
    }
}

struct MtprotoHandshake {
    client: Client,
    login: Mutex<Option<LoginToken>>,
    password: Mutex<Option<PasswordToken>>,
}

impl MtprotoHandshake {
    fn authorized(&self, user: &User) -> AuthChallenge {
        AuthChallenge::Authorized {
            session_blob: Zeroizing::new(self.client.session().save()),
            account: Some(AccountInfo {
                user_id: user.id(),
                username: user.username().map(str::to_string),
                display_name: user.full_name(),
            }),
        }
    }
}

fn invocation_error(err: &InvocationError) -> ProviderError {
    match err {
        InvocationError::Rpc(rpc) => ProviderError::from_rpc(rpc.code, &rpc.name, rpc.value),
        other => ProviderError::transient(other.to_string()),
    }
}

fn sign_in_error(err: SignInError) -> ProviderError {
    match err {
        SignInError::InvalidCode => ProviderError::InvalidCode,
        SignInError::InvalidPassword => ProviderError::InvalidPassword,
        SignInError::SignUpRequired { .. } => ProviderError::SignUpRequired,
        SignInError::Other(e) => invocation_error(&e),
        other => ProviderError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl AuthHandshake for MtprotoHandshake {
    async fn submit_code(&self, code: &str) -> ProviderResult<AuthChallenge> {
        let login = self.login.lock().await;
        let token = login
            .as_ref()
            .ok_or_else(|| ProviderError::Rejected("code already accepted".to_string()))?;

        match self.client.sign_in(token, code).await {
            Ok(user) => Ok(self.authorized(&user)),
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(|h| h.to_string());
                *self.password.lock().await = Some(password_token);
                debug!("Sign-in needs a two-factor password");
                Ok(AuthChallenge::PasswordRequired { hint })
            }
            Err(e) => Err(sign_in_error(e)),
        }
    }

    async fn submit_password(&self, password: &str) -> ProviderResult<AuthChallenge> {
        let token = self
            .password
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Rejected("no password requested".to_string()))?;

        match self.client.check_password(token, password).await {
            Ok(user) => Ok(self.authorized(&user)),
            Err(e) => Err(sign_in_error(e)),
        }
    }

    async fn close(&self) {
        self.login.lock().await.take();
        self.password.lock().await.take();
    }
}
