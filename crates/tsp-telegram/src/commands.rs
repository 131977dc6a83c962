//! Telegram bot commands and dialogue steps

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};

use tsp_core::{CredentialSummary, PhoneNumber, ProvisioningState, UserIdentity};

use crate::bot::Command;
use crate::client::{ChallengeReply, ProvisioningClient, StatusReply};
use crate::dialogue::{BotDialogue, ConversationState};
use crate::error::{Result, TelegramError};

/// Bot state shared across handlers
pub struct BotState {
    pub client: ProvisioningClient,
    pub admin_user_ids: Vec<u64>,
}

impl BotState {
    /// Only private chats of configured admins may use the bot
    pub fn is_admin_chat(&self, chat_id: ChatId) -> bool {
        u64::try_from(chat_id.0)
            .map(|id| self.admin_user_ids.contains(&id))
            .unwrap_or(false)
    }
}

const HELP_TEXT: &str = r#"🤖 Telegram session provisioning

Commands:
/add [identity] - provision a session (identity defaults to the phone digits)
/status - state of the request in progress
/cancel - abandon the request in progress
/sessions - list stored sessions
/revoke <identity> - delete a stored session
/help - show this help"#;

// ============================================================================
// Command handlers
// ============================================================================

pub async fn handle_command(
    bot: Bot,
    dialogue: BotDialogue,
    msg: Message,
    cmd: Command,
    state: std::sync::Arc<BotState>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let current = dialogue.get_or_default().await?;

    match cmd {
        Command::Help => {
            bot.send_message(chat_id, HELP_TEXT).await?;
        }
        Command::Add(identity) => {
            if current.request_id().is_some() {
                bot.send_message(
                    chat_id,
                    "⚠️ A request is already in progress. Finish it or /cancel first.",
                )
                .await?;
                return Ok(());
            }

            let identity = identity.trim();
            let identity = if identity.is_empty() {
                None
            } else if UserIdentity::parse(identity).is_ok() {
                Some(identity.to_string())
            } else {
                bot.send_message(chat_id, "❌ That identity is not valid. Try another one.")
                    .await?;
                return Ok(());
            };

            dialogue
                .update(ConversationState::AwaitingPhone { identity })
                .await?;
            bot.send_message(
                chat_id,
                "📱 Send the phone number in international format, e.g. +15551234567.",
            )
            .await?;
        }
        Command::Status => match current.request_id() {
            Some(request_id) => {
                let text = match state.client.status(request_id).await {
                    Ok(reply) => format_status(&reply),
                    Err(e) => {
                        let text = describe_error(&e);
                        update_after_error(&dialogue, &e, current.clone()).await?;
                        text
                    }
                };
                bot.send_message(chat_id, text).await?;
            }
            None => {
                let text = match &current {
                    ConversationState::AwaitingPhone { .. } => {
                        "Waiting for a phone number. Send it or /cancel."
                    }
                    _ => "No request in progress. Use /add to start one.",
                };
                bot.send_message(chat_id, text).await?;
            }
        },
        Command::Cancel => {
            if current == ConversationState::Idle {
                bot.send_message(chat_id, "Nothing to cancel.").await?;
                return Ok(());
            }
            if let Some(request_id) = current.request_id() {
                if let Err(e) = state.client.cancel(request_id).await {
                    if !is_gone(&e) {
                        bot.send_message(chat_id, describe_error(&e)).await?;
                        return Ok(());
                    }
                }
                info!("Request {} cancelled from chat {}", request_id, chat_id);
            }
            dialogue.exit().await?;
            bot.send_message(chat_id, "🛑 Cancelled.").await?;
        }
        Command::Sessions => {
            let text = match state.client.list_credentials().await {
                Ok(sessions) => format_sessions(&sessions),
                Err(e) => describe_error(&e),
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Revoke(identity) => {
            let identity = identity.trim();
            if identity.is_empty() {
                bot.send_message(chat_id, "Usage: /revoke <identity>").await?;
                return Ok(());
            }
            let text = match state.client.revoke(identity).await {
                Ok(()) => {
                    info!("Credential for {} revoked from chat {}", identity, chat_id);
                    format!("✅ Session for {} revoked.", identity)
                }
                Err(e) => describe_error(&e),
            };
            bot.send_message(chat_id, text).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Dialogue steps
// ============================================================================

pub async fn receive_phone(
    bot: Bot,
    dialogue: BotDialogue,
    msg: Message,
    state: std::sync::Arc<BotState>,
    identity: Option<String>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat_id, "Send the phone number as text.").await?;
        return Ok(());
    };

    let phone = match PhoneNumber::parse(text) {
        Ok(phone) => phone,
        Err(_) => {
            bot.send_message(
                chat_id,
                "❌ That does not look like a phone number. Use international format, e.g. +15551234567.",
            )
            .await?;
            return Ok(());
        }
    };
    let identity = identity.unwrap_or_else(|| identity_from_phone(&phone));

    match state.client.start(&identity, phone.as_str()).await {
        Ok(reply) => {
            info!("Request {} started for {} from chat {}", reply.request_id, identity, chat_id);
            dialogue
                .update(ConversationState::AwaitingCode {
                    request_id: reply.request_id,
                })
                .await?;
            bot.send_message(
                chat_id,
                format!(
                    "📨 Code sent to {}.\nSend it here with spaces between the digits (e.g. 1 2 3 4 5). Telegram voids codes forwarded unchanged.",
                    phone.masked()
                ),
            )
            .await?;
        }
        Err(e) => {
            warn!("Start for {} failed: {}", identity, e);
            if e.api_code() != Some("InvalidPhoneNumber") {
                dialogue.exit().await?;
            }
            bot.send_message(chat_id, describe_error(&e)).await?;
        }
    }
    Ok(())
}

pub async fn receive_code(
    bot: Bot,
    dialogue: BotDialogue,
    msg: Message,
    state: std::sync::Arc<BotState>,
    request_id: String,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat_id, "Send the code as text.").await?;
        return Ok(());
    };

    let current = ConversationState::AwaitingCode {
        request_id: request_id.clone(),
    };
    let outcome = state.client.submit_code(&request_id, text).await;
    relay_outcome(&bot, &dialogue, chat_id, outcome, current).await
}

pub async fn receive_password(
    bot: Bot,
    dialogue: BotDialogue,
    msg: Message,
    state: std::sync::Arc<BotState>,
    request_id: String,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(password) = msg.text().map(str::to_string) else {
        bot.send_message(chat_id, "Send the password as text.").await?;
        return Ok(());
    };

    // Best effort: the password should not linger in the chat history
    if let Err(e) = bot.delete_message(chat_id, msg.id).await {
        warn!("Could not delete password message in chat {}: {}", chat_id, e);
    }

    let current = ConversationState::AwaitingPassword {
        request_id: request_id.clone(),
    };
    let outcome = state.client.submit_password(&request_id, &password).await;
    relay_outcome(&bot, &dialogue, chat_id, outcome, current).await
}

pub async fn handle_idle(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, "Use /add to provision a session or /help for commands.")
        .await?;
    Ok(())
}

pub async fn handle_unauthorized(bot: Bot, msg: Message) -> Result<()> {
    warn!("Ignoring message from non-admin chat {}", msg.chat.id);
    bot.send_message(msg.chat.id, "⚠️ You are not allowed to use this bot.")
        .await?;
    Ok(())
}

async fn relay_outcome(
    bot: &Bot,
    dialogue: &BotDialogue,
    chat_id: ChatId,
    outcome: Result<ChallengeReply>,
    current: ConversationState,
) -> Result<()> {
    let text = match outcome {
        Ok(reply) => {
            let (next, text) = challenge_outcome(&reply);
            if reply.state == ProvisioningState::Completed {
                info!("Request {} completed from chat {}", reply.request_id, chat_id);
            }
            dialogue.update(next).await?;
            text
        }
        Err(e) => {
            let text = describe_error(&e);
            update_after_error(dialogue, &e, current).await?;
            text
        }
    };
    bot.send_message(chat_id, text).await?;
    Ok(())
}

async fn update_after_error(
    dialogue: &BotDialogue,
    err: &TelegramError,
    current: ConversationState,
) -> Result<()> {
    dialogue.update(state_after_error(err, current)).await?;
    Ok(())
}

// ============================================================================
// Reply formatting
// ============================================================================

/// Identity used when `/add` is given no argument: the phone's digits
pub fn identity_from_phone(phone: &PhoneNumber) -> String {
    phone.as_str().chars().filter(|c| c.is_ascii_digit()).collect()
}

fn state_label(state: ProvisioningState) -> &'static str {
    match state {
        ProvisioningState::AwaitingCode => "waiting for the code",
        ProvisioningState::AwaitingPassword => "waiting for the password",
        ProvisioningState::Completed => "completed",
        ProvisioningState::Failed => "failed",
        ProvisioningState::Expired => "expired",
    }
}

/// Next dialogue state and the reply for a successful step
pub fn challenge_outcome(reply: &ChallengeReply) -> (ConversationState, String) {
    match reply.state {
        ProvisioningState::AwaitingPassword => {
            let mut text = "🔐 This account has two-step verification. Send the password.".to_string();
            if let Some(hint) = reply.password_hint.as_deref().filter(|h| !h.is_empty()) {
                text.push_str(&format!("\nHint: {}", hint));
            }
            (
                ConversationState::AwaitingPassword {
                    request_id: reply.request_id.clone(),
                },
                text,
            )
        }
        ProvisioningState::Completed => (
            ConversationState::Idle,
            "✅ Session issued and stored.".to_string(),
        ),
        ProvisioningState::AwaitingCode => (
            ConversationState::AwaitingCode {
                request_id: reply.request_id.clone(),
            },
            "Send the code.".to_string(),
        ),
        other => (
            ConversationState::Idle,
            format!("Request {}. Use /add to start again.", state_label(other)),
        ),
    }
}

/// Whether the request behind a failed call can still be continued
pub fn state_after_error(err: &TelegramError, current: ConversationState) -> ConversationState {
    let keep = match err {
        TelegramError::Api {
            state: Some(state), ..
        } => !state.is_terminal(),
        TelegramError::Api { kind, .. } => kind != "not_found",
        _ => true,
    };
    if keep { current } else { ConversationState::Idle }
}

fn is_gone(err: &TelegramError) -> bool {
    matches!(err.api_code(), Some("UnknownRequest" | "RequestClosed" | "NotFound"))
}

/// User-facing text for a failed call, with a resubmit instruction
pub fn describe_error(err: &TelegramError) -> String {
    match err {
        TelegramError::Api {
            code,
            message,
            state,
            ..
        } => {
            let hint = match code.as_str() {
                "InvalidCode" => "Send the code again.",
                "InvalidPassword" => "Send the password again.",
                "InvalidPhoneNumber" => "Send the number in international format, e.g. +15551234567.",
                "InvalidInput" => "Check the value and send it again.",
                "InvalidIdentity" => "Use /add with a different identity.",
                "AlreadyInProgress" => "Wait for the running request to finish or expire.",
                "UnknownRequest" | "NotFound" => "The request is gone. Use /add to start again.",
                "WrongStep" => "Use /status to see what is expected.",
                "ProviderUnavailable" => "Telegram is busy. Send it again in a moment.",
                "RequestClosed" | "ProviderRejected" => "Use /add to start again.",
                "CredentialNotFound" => "Use /sessions to see stored sessions.",
                "Unauthorized" => "The bot is not allowed to use the provisioning API.",
                _ => "Try again later.",
            };
            match state {
                Some(state) => format!("❌ {}\nState: {}. {}", message, state_label(*state), hint),
                None => format!("❌ {}\n{}", message, hint),
            }
        }
        TelegramError::Http(_) => "❌ The provisioning service is unreachable. Try again later.".to_string(),
        _ => "❌ Something went wrong. Try again later.".to_string(),
    }
}

pub fn format_status(reply: &StatusReply) -> String {
    format!(
        "Request {}\nIdentity: {}\nState: {}\nAttempts left: {}\nLast activity: {} UTC",
        reply.request_id,
        reply.user_identity,
        state_label(reply.state),
        reply.attempts_remaining,
        reply.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn format_sessions(sessions: &[CredentialSummary]) -> String {
    if sessions.is_empty() {
        return "No stored sessions.".to_string();
    }

    let mut text = format!("🗂 {} stored session(s):", sessions.len());
    for session in sessions {
        text.push_str(&format!(
            "\n• {} ({}), issued {} UTC",
            session.user_identity,
            session.phone_masked,
            session.issued_at.format("%Y-%m-%d %H:%M")
        ));
        if let Some(account) = &session.account {
            match &account.username {
                Some(username) => text.push_str(&format!(", @{}", username)),
                None => text.push_str(&format!(", {}", account.display_name)),
            }
        }
    }
    text
}
