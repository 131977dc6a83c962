//! Per-chat conversation state
//!
//! Only the current request id is kept here. Phone numbers, codes and
//! passwords are relayed straight to the provisioning API.

use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    /// Waiting for the phone number; `identity` was given with `/add`
    AwaitingPhone { identity: Option<String> },
    AwaitingCode { request_id: String },
    AwaitingPassword { request_id: String },
}

impl ConversationState {
    /// Request id of the flow in progress, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::AwaitingCode { request_id } | Self::AwaitingPassword { request_id } => {
                Some(request_id)
            }
            _ => None,
        }
    }
}

pub type ConversationStorage = InMemStorage<ConversationState>;
pub type BotDialogue = Dialogue<ConversationState, ConversationStorage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_only_while_awaiting_secrets() {
        assert_eq!(ConversationState::Idle.request_id(), None);
        assert_eq!(
            ConversationState::AwaitingPhone { identity: None }.request_id(),
            None
        );
        assert_eq!(
            ConversationState::AwaitingPassword {
                request_id: "r1".to_string()
            }
            .request_id(),
            Some("r1")
        );
    }
}
