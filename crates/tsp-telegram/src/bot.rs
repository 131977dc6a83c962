//! Telegram bot implementation

use std::sync::Arc;

use teloxide::{
    dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler},
    prelude::*,
    utils::command::BotCommands,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ProvisioningClient;
use crate::commands::{
    BotState, handle_command, handle_idle, handle_unauthorized, receive_code, receive_password,
    receive_phone,
};
use crate::dialogue::{ConversationState, ConversationStorage};
use crate::error::{Result, TelegramError};

/// Telegram bot commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(
    rename_rule = "lowercase",
    description = "Telegram session provisioning commands"
)]
pub enum Command {
    #[command(description = "Show help message")]
    Help,
    #[command(description = "Provision a session: /add [identity]")]
    Add(String),
    #[command(description = "State of the request in progress")]
    Status,
    #[command(description = "Abandon the request in progress")]
    Cancel,
    #[command(description = "List stored sessions")]
    Sessions,
    #[command(description = "Delete a stored session: /revoke <identity>")]
    Revoke(String),
}

/// Update handler tree: admin gate, commands, then the dialogue step
pub fn schema() -> UpdateHandler<TelegramError> {
    use dptree::case;

    let dialogue = dptree::entry()
        .enter_dialogue::<Message, ConversationStorage, ConversationState>()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(case![ConversationState::AwaitingPhone { identity }].endpoint(receive_phone))
        .branch(case![ConversationState::AwaitingCode { request_id }].endpoint(receive_code))
        .branch(
            case![ConversationState::AwaitingPassword { request_id }].endpoint(receive_password),
        )
        .branch(dptree::endpoint(handle_idle));

    Update::filter_message()
        .branch(
            dptree::filter(|msg: Message, state: Arc<BotState>| !state.is_admin_chat(msg.chat.id))
                .endpoint(handle_unauthorized),
        )
        .branch(dialogue)
}

/// Telegram bot wrapper
pub struct TelegramBot {
    bot: Bot,
    state: Arc<BotState>,
}

impl TelegramBot {
    /// Create a new Telegram bot relaying to the provisioning API
    pub fn new(token: &str, client: ProvisioningClient, admin_user_ids: Vec<u64>) -> Result<Self> {
        if token.is_empty() {
            return Err(TelegramError::TokenNotSet);
        }

        let state = Arc::new(BotState {
            client,
            admin_user_ids,
        });

        Ok(Self {
            bot: Bot::new(token),
            state,
        })
    }

    /// Run the bot until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting Telegram bot...");

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Could not register bot commands: {}", e);
        }

        let mut dispatcher = Dispatcher::builder(self.bot, schema())
            .dependencies(dptree::deps![ConversationStorage::new(), self.state])
            .build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            if let Ok(done) = token.shutdown() {
                done.await;
            }
        });

        dispatcher.dispatch().await;
        info!("Telegram bot stopped");
        Ok(())
    }
}
