//! Session provisioner
//!
//! State machine, per-identity locking and expiry for multi-step Telegram
//! logins.

pub mod clock;
pub mod error;
pub mod locks;
pub mod manager;
pub mod retry;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, ProvisionError, ProvisionResult};
pub use locks::{IdentityLease, IdentityLocks};
pub use manager::{ChallengeResult, Provisioner, ProvisionerSettings, RequestStatus};
pub use retry::RetryPolicy;
pub use state::ProvisioningState;
