//! tsp-telegram: Telegram bot front end for tsp-gateway
//!
//! Walks an admin through phone, code and password in a private chat and
//! relays each step to the provisioning API.

pub mod bot;
pub mod client;
pub mod commands;
pub mod dialogue;
pub mod error;

pub use bot::TelegramBot;
pub use client::ProvisioningClient;
pub use commands::BotState;
pub use error::{Result, TelegramError};
