//! Session provisioner
//!
//! Drives phone -> code -> (password) logins, one active request per user
//! identity, and hands the resulting session to the credential store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ProvisionError, ProvisionResult};
use super::locks::{IdentityLease, IdentityLocks};
use super::retry::RetryPolicy;
use super::state::ProvisioningState;
use crate::config::ProvisioningConfig;
use crate::credential::{CredentialStore, SessionCredential};
use crate::provider::{AuthChallenge, AuthHandshake, AuthProvider, ProviderError};
use crate::types::{PhoneNumber, RequestId, UserIdentity};

/// Tunables for the provisioner
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Rejected codes (and, separately, passwords) before the request fails
    pub max_attempts: u32,
    /// Idle time before an active request expires
    pub request_ttl: Duration,
    /// How long finished requests stay queryable
    pub archive_retention: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_ttl: Duration::from_secs(300),
            archive_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ProvisioningConfig> for ProvisionerSettings {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            request_ttl: Duration::from_secs(config.request_ttl_secs),
            archive_retention: Duration::from_secs(config.archive_retention_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Outcome of a successful step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeResult {
    pub request_id: RequestId,
    pub state: ProvisioningState,
    pub attempts_remaining: u32,
    /// Two-factor password hint, when the account has one
    pub password_hint: Option<String>,
}

/// Point-in-time view of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestStatus {
    pub request_id: RequestId,
    pub user_identity: UserIdentity,
    pub state: ProvisioningState,
    pub attempts_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct ActiveRequest {
    request_id: RequestId,
    user_identity: UserIdentity,
    phone_number: PhoneNumber,
    state: ProvisioningState,
    /// Rejections in the current step
    attempts: u32,
    password_hint: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    handshake: Box<dyn AuthHandshake>,
    lease: Option<IdentityLease>,
}

impl ActiveRequest {
    fn attempts_remaining(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempts)
    }

    fn status(&self, max_attempts: u32, finished_at: Option<DateTime<Utc>>) -> RequestStatus {
        RequestStatus {
            request_id: self.request_id,
            user_identity: self.user_identity.clone(),
            state: self.state,
            attempts_remaining: self.attempts_remaining(max_attempts),
            created_at: self.created_at,
            updated_at: self.last_activity_at,
            finished_at,
        }
    }

    fn result(&self, max_attempts: u32) -> ChallengeResult {
        ChallengeResult {
            request_id: self.request_id,
            state: self.state,
            attempts_remaining: self.attempts_remaining(max_attempts),
            password_hint: self.password_hint.clone(),
        }
    }
}

type RequestHandle = Arc<Mutex<ActiveRequest>>;

/// Where a lookup landed
enum Lookup {
    Active(RequestHandle),
    Finished(ProvisioningState),
    Missing,
}

/// Which secret a step submits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Code,
    Password,
}

impl Step {
    fn expected_state(self) -> ProvisioningState {
        match self {
            Self::Code => ProvisioningState::AwaitingCode,
            Self::Password => ProvisioningState::AwaitingPassword,
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Self::Code => "auth.signIn",
            Self::Password => "auth.checkPassword",
        }
    }
}

/// Session provisioner
pub struct Provisioner {
    provider: Arc<dyn AuthProvider>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    locks: IdentityLocks,
    /// Non-terminal requests
    active: DashMap<RequestId, RequestHandle>,
    /// Snapshots of every known request, active or finished
    statuses: DashMap<RequestId, RequestStatus>,
    settings: ProvisionerSettings,
    request_ttl: TimeDelta,
    archive_retention: TimeDelta,
}

impl Provisioner {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        store: Arc<dyn CredentialStore>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self::with_clock(provider, store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn AuthProvider>,
        store: Arc<dyn CredentialStore>,
        settings: ProvisionerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Provisioner ready (provider: {}, max attempts: {}, ttl: {:?})",
            provider.name(),
            settings.max_attempts,
            settings.request_ttl
        );
        Self {
            provider,
            store,
            clock,
            locks: IdentityLocks::new(),
            active: DashMap::new(),
            statuses: DashMap::new(),
            request_ttl: TimeDelta::from_std(settings.request_ttl).unwrap_or(TimeDelta::MAX),
            archive_retention: TimeDelta::from_std(settings.archive_retention)
                .unwrap_or(TimeDelta::MAX),
            settings,
        }
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Number of requests currently in flight
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Begin provisioning `user_identity` with `phone_number`; a login code
    /// is sent to the account.
    pub async fn start(&self, user_identity: &str, phone_number: &str) -> ProvisionResult<RequestId> {
        let identity = UserIdentity::parse(user_identity)?;
        let phone = PhoneNumber::parse(phone_number)?;
        let request_id = RequestId::new();

        let lease = match self.locks.acquire(&identity, request_id) {
            Ok(lease) => lease,
            Err(holder) => {
                // The holder may have idled out without the sweeper noticing yet.
                if !self.expire_if_idle(holder).await {
                    warn!("Provisioning already in progress for {}", identity);
                    return Err(ProvisionError::AlreadyInProgress { request_id: holder });
                }
                self.locks
                    .acquire(&identity, request_id)
                    .map_err(|holder| ProvisionError::AlreadyInProgress { request_id: holder })?
            }
        };

        let handshake = self
            .settings
            .retry
            .run("auth.sendCode", || self.provider.send_code(&phone))
            .await
            .map_err(|e| {
                warn!("Sending code to {} failed: {}", phone.masked(), e);
                match e {
                    ProviderError::PhoneNumberInvalid => ProvisionError::InvalidPhoneNumber,
                    e => step_failure(&e, None),
                }
            })?;

        let now = self.clock.now();
        let request = ActiveRequest {
            request_id,
            user_identity: identity.clone(),
            phone_number: phone,
            state: ProvisioningState::after(&AuthChallenge::CodeSent),
            attempts: 0,
            password_hint: None,
            created_at: now,
            last_activity_at: now,
            handshake,
            lease: Some(lease),
        };
        self.publish(&request, None);
        info!(
            "Provisioning {} started for {} ({})",
            request_id,
            identity,
            request.phone_number.masked()
        );
        self.active.insert(request_id, Arc::new(Mutex::new(request)));

        Ok(request_id)
    }

    /// Submit the login code for `request_id`
    pub async fn submit_code(&self, request_id: RequestId, code: &str) -> ProvisionResult<ChallengeResult> {
        self.submit(request_id, Step::Code, code).await
    }

    /// Submit the two-factor password for `request_id`
    pub async fn submit_password(
        &self,
        request_id: RequestId,
        password: &str,
    ) -> ProvisionResult<ChallengeResult> {
        self.submit(request_id, Step::Password, password).await
    }

    /// Current state of `request_id`, active or recently finished
    pub async fn status(&self, request_id: RequestId) -> ProvisionResult<RequestStatus> {
        self.expire_if_idle(request_id).await;
        self.statuses
            .get(&request_id)
            .map(|s| s.value().clone())
            .ok_or(ProvisionError::UnknownRequest(request_id))
    }

    /// Abort a request in flight. It ends as `Failed` and frees the identity.
    pub async fn cancel(&self, request_id: RequestId) -> ProvisionResult<RequestStatus> {
        let handle = self.active_handle(request_id)?;
        let mut request = handle.lock().await;
        self.check_open(&request)?;

        info!("Provisioning {} cancelled", request_id);
        Ok(self.finish(&mut request, ProvisioningState::Failed).await)
    }

    /// Expire requests idle past the TTL and prune finished requests past
    /// their retention. Returns how many requests expired.
    pub async fn expire_stale_requests(&self) -> usize {
        let now = self.clock.now();
        let handles: Vec<RequestHandle> = self.active.iter().map(|e| Arc::clone(e.value())).collect();

        let mut expired = 0;
        for handle in handles {
            // A step in progress counts as activity.
            let Ok(mut request) = handle.try_lock() else {
                continue;
            };
            if !request.state.is_terminal() && self.is_idle(&request, now) {
                self.finish(&mut request, ProvisioningState::Expired).await;
                expired += 1;
            }
        }

        let retention = self.archive_retention;
        let before = self.statuses.len();
        self.statuses.retain(|_, status| {
            status
                .finished_at
                .is_none_or(|finished| now - finished <= retention)
        });
        let pruned = before - self.statuses.len();

        if expired > 0 || pruned > 0 {
            debug!("Sweep: {} expired, {} pruned", expired, pruned);
        }
        expired
    }

    /// Run [`Self::expire_stale_requests`] every `sweep_interval` until
    /// `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let provisioner = Arc::clone(self);
        let period = self.settings.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = provisioner.expire_stale_requests().await;
                        if expired > 0 {
                            info!("Expired {} idle provisioning request(s)", expired);
                        }
                    }
                }
            }
            debug!("Provisioning sweeper stopped");
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn submit(&self, request_id: RequestId, step: Step, secret: &str) -> ProvisionResult<ChallengeResult> {
        let handle = self.active_handle(request_id)?;
        let mut request = handle.lock().await;
        self.check_open(&request)?;

        if self.is_idle(&request, self.clock.now()) {
            self.finish(&mut request, ProvisioningState::Expired).await;
            return Err(ProvisionError::UnknownRequest(request_id));
        }
        if request.state != step.expected_state() {
            return Err(ProvisionError::WrongStep {
                state: request.state,
            });
        }
        let secret = validate_secret(step, secret)?;
        let secret = secret.as_str();

        let handshake = &*request.handshake;
        let outcome = self
            .settings
            .retry
            .run(step.operation(), || async move {
                match step {
                    Step::Code => handshake.submit_code(secret).await,
                    Step::Password => handshake.submit_password(secret).await,
                }
            })
            .await;

        match outcome {
            Ok(challenge) => self.advance(&mut request, challenge).await,
            Err(ProviderError::InvalidCode) if step == Step::Code => {
                let (attempts_remaining, state) = self.reject_attempt(&mut request).await;
                Err(ProvisionError::InvalidCode {
                    attempts_remaining,
                    state,
                })
            }
            Err(ProviderError::InvalidPassword) if step == Step::Password => {
                let (attempts_remaining, state) = self.reject_attempt(&mut request).await;
                Err(ProvisionError::InvalidPassword {
                    attempts_remaining,
                    state,
                })
            }
            Err(e) if e.is_transient() => {
                warn!("{} for {} unavailable: {}", step.operation(), request_id, e);
                Err(step_failure(&e, Some(request.state)))
            }
            Err(e) => {
                warn!("{} for {} rejected: {}", step.operation(), request_id, e);
                self.finish(&mut request, ProvisioningState::Failed).await;
                Err(step_failure(&e, Some(ProvisioningState::Failed)))
            }
        }
    }

    /// Count a rejected secret; the request fails once attempts run out
    async fn reject_attempt(&self, request: &mut ActiveRequest) -> (u32, ProvisioningState) {
        let max = self.settings.max_attempts;
        request.attempts += 1;
        request.last_activity_at = self.clock.now();

        if request.attempts >= max {
            warn!(
                "Provisioning {} failed after {} rejected attempt(s)",
                request.request_id, request.attempts
            );
            self.finish(request, ProvisioningState::Failed).await;
        } else {
            debug!(
                "Provisioning {}: attempt rejected, {} left",
                request.request_id,
                request.attempts_remaining(max)
            );
            self.publish(request, None);
        }
        (request.attempts_remaining(max), request.state)
    }

    async fn advance(&self, request: &mut ActiveRequest, challenge: AuthChallenge) -> ProvisionResult<ChallengeResult> {
        let max = self.settings.max_attempts;
        let next = ProvisioningState::after(&challenge);
        if next != request.state && !request.state.can_transition_to(next) {
            return Err(ProvisionError::WrongStep {
                state: request.state,
            });
        }

        match challenge {
            AuthChallenge::CodeSent => {
                request.last_activity_at = self.clock.now();
                self.publish(request, None);
            }
            AuthChallenge::PasswordRequired { hint } => {
                request.state = next;
                request.attempts = 0;
                request.password_hint = hint;
                request.last_activity_at = self.clock.now();
                self.publish(request, None);
                info!("Provisioning {} awaiting two-factor password", request.request_id);
            }
            AuthChallenge::Authorized {
                mut session_blob,
                account,
            } => {
                let credential = SessionCredential::new(
                    request.user_identity.clone(),
                    request.phone_number.clone(),
                    std::mem::take(&mut *session_blob),
                    account,
                    self.clock.now(),
                );
                if let Err(e) = self.store.put(&credential).await {
                    error!(
                        "Storing credential for {} failed: {}",
                        request.user_identity, e
                    );
                    self.finish(request, ProvisioningState::Failed).await;
                    return Err(e.into());
                }
                request.password_hint = None;
                self.finish(request, next).await;
            }
        }
        Ok(request.result(max))
    }

    /// Move `request` to terminal `state`: archive it, drop it from the
    /// active set, close the handshake and free the identity.
    async fn finish(&self, request: &mut ActiveRequest, state: ProvisioningState) -> RequestStatus {
        let now = self.clock.now();
        request.state = state;
        request.last_activity_at = now;
        self.active.remove(&request.request_id);
        let status = self.publish(request, Some(now));

        request.handshake.close().await;
        drop(request.lease.take());

        info!(
            "Provisioning {} for {} ended: {}",
            request.request_id, request.user_identity, state
        );
        status
    }

    fn publish(&self, request: &ActiveRequest, finished_at: Option<DateTime<Utc>>) -> RequestStatus {
        let status = request.status(self.settings.max_attempts, finished_at);
        self.statuses.insert(request.request_id, status.clone());
        status
    }

    fn lookup(&self, request_id: RequestId) -> Lookup {
        if let Some(handle) = self.active.get(&request_id).map(|h| Arc::clone(h.value())) {
            return Lookup::Active(handle);
        }
        match self.statuses.get(&request_id).map(|s| s.state) {
            Some(state) => Lookup::Finished(state),
            None => Lookup::Missing,
        }
    }

    fn active_handle(&self, request_id: RequestId) -> ProvisionResult<RequestHandle> {
        match self.lookup(request_id) {
            Lookup::Active(handle) => Ok(handle),
            Lookup::Finished(state) => Err(closed_error(request_id, state)),
            Lookup::Missing => Err(ProvisionError::UnknownRequest(request_id)),
        }
    }

    /// A request may finish while a caller waits for its lock
    fn check_open(&self, request: &ActiveRequest) -> ProvisionResult<()> {
        if request.state.is_terminal() {
            return Err(closed_error(request.request_id, request.state));
        }
        Ok(())
    }

    fn is_idle(&self, request: &ActiveRequest, now: DateTime<Utc>) -> bool {
        now - request.last_activity_at > self.request_ttl
    }

    /// Expire `request_id` if it sat idle past the TTL. Returns true when the
    /// request is no longer active.
    async fn expire_if_idle(&self, request_id: RequestId) -> bool {
        let Lookup::Active(handle) = self.lookup(request_id) else {
            return true;
        };
        let Ok(mut request) = handle.try_lock() else {
            return false;
        };
        if request.state.is_terminal() {
            return true;
        }
        if self.is_idle(&request, self.clock.now()) {
            self.finish(&mut request, ProvisioningState::Expired).await;
            return true;
        }
        false
    }
}

/// Expired requests are reported as unknown; other finished ones as closed
fn closed_error(request_id: RequestId, state: ProvisioningState) -> ProvisionError {
    match state {
        ProvisioningState::Expired => ProvisionError::UnknownRequest(request_id),
        state => ProvisionError::RequestClosed { state },
    }
}

/// Map a provider failure the flow cannot absorb. Provider detail stays in
/// the logs.
fn step_failure(err: &ProviderError, state: Option<ProvisioningState>) -> ProvisionError {
    let message = match err {
        e if e.is_transient() => return ProvisionError::ProviderUnavailable { state },
        ProviderError::CodeExpired => "the login code expired, start again",
        ProviderError::SignUpRequired => "this phone number is not registered with Telegram",
        ProviderError::PhoneNumberInvalid => "Telegram rejected the phone number",
        _ => "Telegram rejected the request",
    };
    ProvisionError::ProviderRejected {
        message: message.to_string(),
        state,
    }
}

/// Codes are digits only; passwords just need to be non-empty
fn validate_secret(step: Step, secret: &str) -> ProvisionResult<String> {
    match step {
        Step::Code => {
            let code: String = secret.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
            if code.is_empty() || code.len() > 10 || !code.chars().all(|c| c.is_ascii_digit()) {
                return Err(ProvisionError::InvalidInput(
                    "the code must consist of digits".to_string(),
                ));
            }
            Ok(code)
        }
        Step::Password => {
            if secret.is_empty() {
                return Err(ProvisionError::InvalidInput(
                    "the password must not be empty".to_string(),
                ));
            }
            Ok(secret.to_string())
        }
    }
}
