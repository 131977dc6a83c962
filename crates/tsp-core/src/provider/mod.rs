//! External auth protocol
//!
//! Providers:
//! - `MockAuthProvider`: scripted, no network
//! - `MtprotoAuthProvider`: real Telegram login (feature `mtproto`)

pub mod mock;
#[cfg(feature = "mtproto")]
pub mod mtproto;
pub mod types;

pub use mock::MockAuthProvider;
#[cfg(feature = "mtproto")]
pub use mtproto::MtprotoAuthProvider;
pub use types::{AuthChallenge, AuthHandshake, AuthProvider, ProviderError, ProviderResult};
