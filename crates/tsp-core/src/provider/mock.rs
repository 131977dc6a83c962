//! Scripted auth provider for tests and local development

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

use super::types::{AuthChallenge, AuthHandshake, AuthProvider, ProviderError, ProviderResult};
use crate::credential::AccountInfo;
use crate::types::PhoneNumber;

#[derive(Debug, Default)]
struct Counters {
    pending_failures: AtomicU32,
    codes_sent: AtomicUsize,
    closed: AtomicUsize,
}

impl Counters {
    /// Consume one scripted transient failure, if any are queued
    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Provider that accepts one fixed code (and optionally one password).
///
/// Clones share counters, so a test can keep a handle after giving the
/// provider to a provisioner.
#[derive(Debug, Clone)]
pub struct MockAuthProvider {
    code: String,
    password: Option<String>,
    hint: Option<String>,
    rejected_phones: Vec<String>,
    unregistered_phones: Vec<String>,
    flood_wait: Option<Duration>,
    counters: Arc<Counters>,
}

impl MockAuthProvider {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            password: None,
            hint: None,
            rejected_phones: Vec::new(),
            unregistered_phones: Vec::new(),
            flood_wait: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Require a two-factor password after the code
    pub fn with_password(mut self, password: impl Into<String>, hint: Option<&str>) -> Self {
        self.password = Some(password.into());
        self.hint = hint.map(str::to_string);
        self
    }

    /// Answer `PHONE_NUMBER_INVALID` for `phone`
    pub fn reject_phone(mut self, phone: &str) -> Self {
        self.rejected_phones.push(phone.to_string());
        self
    }

    /// Answer `PHONE_NUMBER_UNOCCUPIED` at the code step for `phone`
    pub fn unregistered_phone(mut self, phone: &str) -> Self {
        self.unregistered_phones.push(phone.to_string());
        self
    }

    /// Scripted transient failures carry this `FLOOD_WAIT`
    pub fn with_flood_wait(mut self, wait: Duration) -> Self {
        self.flood_wait = Some(wait);
        self
    }

    /// Make the next `n` protocol calls fail transiently
    pub fn fail_next(&self, n: u32) {
        self.counters.pending_failures.store(n, Ordering::SeqCst);
    }

    pub fn codes_sent(&self) -> usize {
        self.counters.codes_sent.load(Ordering::SeqCst)
    }

    pub fn closed_handshakes(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    fn transient(&self) -> ProviderError {
        ProviderError::Transient {
            reason: "simulated connection loss".to_string(),
            retry_after: self.flood_wait,
        }
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_code(&self, phone: &PhoneNumber) -> ProviderResult<Box<dyn AuthHandshake>> {
        if self.counters.take_failure() {
            return Err(self.transient());
        }
        if self.rejected_phones.iter().any(|p| p == phone.as_str()) {
            return Err(ProviderError::PhoneNumberInvalid);
        }
        self.counters.codes_sent.fetch_add(1, Ordering::SeqCst);
        debug!("mock: code sent to {}", phone.masked());

        Ok(Box::new(MockHandshake {
            provider: self.clone(),
            phone: phone.clone(),
            code_accepted: AtomicBool::new(false),
        }))
    }
}

struct MockHandshake {
    provider: MockAuthProvider,
    phone: PhoneNumber,
    code_accepted: AtomicBool,
}

impl MockHandshake {
    fn authorized(&self) -> AuthChallenge {
        let digits: String = self.phone.as_str().chars().filter(char::is_ascii_digit).collect();
        AuthChallenge::Authorized {
            session_blob: Zeroizing::new(format!("mock-session:{}", digits).into_bytes()),
            account: Some(AccountInfo {
                user_id: digits.parse().unwrap_or_default(),
                username: None,
                display_name: "Mock User".to_string(),
            }),
        }
    }
}

#[async_trait]
impl AuthHandshake for MockHandshake {
    async fn submit_code(&self, code: &str) -> ProviderResult<AuthChallenge> {
        if self.provider.counters.take_failure() {
            return Err(self.provider.transient());
        }
        if code != self.provider.code {
            return Err(ProviderError::InvalidCode);
        }
        if self
            .provider
            .unregistered_phones
            .iter()
            .any(|p| p == self.phone.as_str())
        {
            return Err(ProviderError::SignUpRequired);
        }
        self.code_accepted.store(true, Ordering::SeqCst);

        Ok(match &self.provider.password {
            Some(_) => AuthChallenge::PasswordRequired {
                hint: self.provider.hint.clone(),
            },
            None => self.authorized(),
        })
    }

    async fn submit_password(&self, password: &str) -> ProviderResult<AuthChallenge> {
        if self.provider.counters.take_failure() {
            return Err(self.provider.transient());
        }
        if !self.code_accepted.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("password before code".to_string()));
        }
        match &self.provider.password {
            Some(expected) if expected == password => Ok(self.authorized()),
            Some(_) => Err(ProviderError::InvalidPassword),
            None => Err(ProviderError::Rejected("no password required".to_string())),
        }
    }

    async fn close(&self) {
        self.provider.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
