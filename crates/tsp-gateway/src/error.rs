//! エラー型定義 (tsp-gateway)

use std::fmt;

/// tsp-gateway の統合エラー型
///
/// 各サブクレートのエラー型を統合して扱います
#[derive(Debug)]
pub enum GatewayError {
    /// Core error (configuration, credential store)
    Core(tsp_core::Error),
    /// Bot error
    Telegram(tsp_telegram::TelegramError),
    /// Other error
    Other(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(e) => write!(f, "Core error: {}", e),
            Self::Telegram(e) => write!(f, "Telegram error: {}", e),
            Self::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<tsp_core::Error> for GatewayError {
    fn from(e: tsp_core::Error) -> Self {
        Self::Core(e)
    }
}

impl From<tsp_telegram::TelegramError> for GatewayError {
    fn from(e: tsp_telegram::TelegramError) -> Self {
        Self::Telegram(e)
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, GatewayError>;
