//! Provisioning state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::AuthChallenge;

/// Lifecycle of a provisioning request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    AwaitingCode,
    AwaitingPassword,
    Completed,
    Failed,
    Expired,
}

impl ProvisioningState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingCode => "awaiting_code",
            Self::AwaitingPassword => "awaiting_password",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Transition table.
    ///
    /// ```text
    /// AwaitingCode     -> AwaitingPassword | Completed | Failed | Expired
    /// AwaitingPassword -> Completed | Failed | Expired
    /// ```
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProvisioningState::*;
        matches!(
            (self, next),
            (AwaitingCode, AwaitingPassword | Completed | Failed | Expired)
                | (AwaitingPassword, Completed | Failed | Expired)
        )
    }

    /// State the protocol's answer leads to
    pub fn after(challenge: &AuthChallenge) -> Self {
        match challenge {
            AuthChallenge::CodeSent => Self::AwaitingCode,
            AuthChallenge::PasswordRequired { .. } => Self::AwaitingPassword,
            AuthChallenge::Authorized { .. } => Self::Completed,
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProvisioningState::*;

    const ALL: [ProvisioningState; 5] = [AwaitingCode, AwaitingPassword, Completed, Failed, Expired];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_password_step_cannot_go_back() {
        assert!(!AwaitingPassword.can_transition_to(AwaitingCode));
        assert!(AwaitingCode.can_transition_to(AwaitingPassword));
        assert!(AwaitingPassword.can_transition_to(Completed));
    }

    #[test]
    fn test_after_challenge() {
        assert_eq!(ProvisioningState::after(&AuthChallenge::CodeSent), AwaitingCode);
        assert_eq!(
            ProvisioningState::after(&AuthChallenge::PasswordRequired { hint: None }),
            AwaitingPassword
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&AwaitingPassword).unwrap(),
            "\"awaiting_password\""
        );
        let state: ProvisioningState = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(state, Expired);
    }
}
