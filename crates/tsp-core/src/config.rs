//! Configuration management
//!
//! Settings are resolved in this order (later wins):
//! 1. defaults
//! 2. `tsp-gateway.toml` (if present)
//! 3. environment variables
//!
//! `${VAR_NAME}` inside the TOML file is replaced with the environment value.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Error;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tsp-gateway.toml";

/// Main configuration for tsp-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Telegram application and bot settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Application id from my.telegram.org
    pub api_id: i32,

    /// Application hash from my.telegram.org
    pub api_hash: String,

    /// Bot token from @BotFather (bot front end only)
    pub bot_token: Option<String>,

    /// Telegram user ids allowed to use the bot
    pub admin_user_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Value expected in the `X-API-Key` header. Unset disables the check.
    pub key: Option<String>,

    /// Base URL the bot uses to reach the API
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            key: None,
            base_url: default_api_base_url(),
        }
    }
}

/// Which auth provider drives logins
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Real Telegram login over MTProto
    #[default]
    Mtproto,
    /// Scripted provider, accepts code `12345` (development only)
    Mock,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mtproto" | "telegram" => Some(Self::Mtproto),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Rejected codes/passwords before a request fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Idle seconds before an active request expires
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds finished requests stay queryable
    #[serde(default = "default_archive_retention_secs")]
    pub archive_retention_secs: u64,

    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            request_ttl_secs: default_request_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            archive_retention_secs: default_archive_retention_secs(),
            provider: ProviderKind::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for transient Telegram errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound per wait; longer FLOOD_WAITs are not waited out
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Sqlite,
    S3,
    Memory,
}

impl StorageBackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "s3" => Some(Self::S3),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base64 master key for credential encryption (`tsp-gateway gen-key`)
    pub encryption_key: Option<String>,

    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            db_path: default_db_path(),
            encryption_key: None,
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_s3_prefix")]
    pub prefix: String,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_api_base_url() -> String {
    format!("http://{}:{}", default_api_host(), default_api_port())
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_archive_retention_secs() -> u64 {
    3600
}

fn default_max_retries() -> usize {
    3
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_db_path() -> String {
    "data/tsp-gateway.db".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_s3_prefix() -> String {
    "sessions".to_string()
}

fn env_list(value: &str) -> Vec<u64> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

impl Config {
    /// 設定ファイル内の `${VAR_NAME}` を環境変数の値に置換する
    ///
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let expanded_content = Self::expand_env_vars(&toml_content);

        let mut cfg: Config = toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        // 環境変数が優先
        cfg.apply_env_overrides()?;

        Ok(cfg)
    }

    /// Load `./tsp-gateway.toml` if it exists, otherwise the environment only
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }
        Self::from_env()
    }

    /// Load an explicit file, or fall back to [`Config::load`]
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None => Self::load(),
        }
    }

    /// Defaults plus environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) -> crate::Result<()> {
        // Telegram
        if let Ok(id) = std::env::var("API_ID") {
            self.telegram.api_id = id
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("API_ID must be a number, got {:?}", id)))?;
        }
        if let Ok(hash) = std::env::var("API_HASH") {
            self.telegram.api_hash = hash;
        }
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram.bot_token = Some(token);
            }
        }
        if let Ok(ids) = std::env::var("ADMIN_IDS") {
            self.telegram.admin_user_ids = env_list(&ids);
        }

        // API
        if let Ok(key) = std::env::var("API_KEY") {
            self.api.key = if key.is_empty() { None } else { Some(key) };
        }
        if let Ok(host) = std::env::var("API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }
        if let Ok(url) = std::env::var("API_BASE_URL") {
            if !url.is_empty() {
                self.api.base_url = url;
            }
        }

        // Provisioning
        if let Ok(provider) = std::env::var("AUTH_PROVIDER") {
            self.provisioning.provider = ProviderKind::parse(&provider).ok_or_else(|| {
                Error::Config(format!("AUTH_PROVIDER must be mtproto or mock, got {:?}", provider))
            })?;
        }
        if let Some(n) = std::env::var("MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()) {
            self.provisioning.max_attempts = n;
        }
        if let Some(n) = std::env::var("REQUEST_TTL_SECS").ok().and_then(|v| v.parse().ok()) {
            self.provisioning.request_ttl_secs = n;
        }

        // Storage
        if let Ok(backend) = std::env::var("STORAGE_BACKEND") {
            self.storage.backend = StorageBackendKind::parse(&backend).ok_or_else(|| {
                Error::Config(format!(
                    "STORAGE_BACKEND must be sqlite, s3 or memory, got {:?}",
                    backend
                ))
            })?;
        }
        if let Ok(path) = std::env::var("DB_PATH") {
            self.storage.db_path = path;
        }
        if let Ok(key) = std::env::var("ENCRYPTION_KEY") {
            if !key.is_empty() {
                self.storage.encryption_key = Some(key);
            }
        }

        // S3-compatible storage
        let s3_vars = [
            "S3_ENDPOINT_URL",
            "S3_BUCKET_NAME",
            "S3_REGION_NAME",
            "S3_ACCESS_KEY_ID",
            "S3_SECRET_ACCESS_KEY",
            "S3_PREFIX",
        ];
        if s3_vars.iter().any(|v| std::env::var(v).is_ok()) {
            let s3 = self.storage.s3.get_or_insert_with(|| S3Config {
                region: default_s3_region(),
                prefix: default_s3_prefix(),
                ..Default::default()
            });
            if let Ok(v) = std::env::var("S3_ENDPOINT_URL") {
                s3.endpoint = v;
            }
            if let Ok(v) = std::env::var("S3_BUCKET_NAME") {
                s3.bucket = v;
            }
            if let Ok(v) = std::env::var("S3_REGION_NAME") {
                s3.region = v;
            }
            if let Ok(v) = std::env::var("S3_ACCESS_KEY_ID") {
                s3.access_key_id = v;
            }
            if let Ok(v) = std::env::var("S3_SECRET_ACCESS_KEY") {
                s3.secret_access_key = v;
            }
            if let Ok(v) = std::env::var("S3_PREFIX") {
                s3.prefix = v;
            }
        }

        Ok(())
    }

    /// Check what the API server needs: an encryption key, a usable storage
    /// backend and, for MTProto, application credentials.
    pub fn validate_server(&self) -> crate::Result<()> {
        if self.provisioning.max_attempts == 0 {
            return Err(Error::Config("provisioning.max_attempts must be at least 1".into()));
        }
        if self.provisioning.request_ttl_secs == 0 {
            return Err(Error::Config("provisioning.request_ttl_secs must be positive".into()));
        }
        if self.provisioning.sweep_interval_secs == 0 {
            return Err(Error::Config("provisioning.sweep_interval_secs must be positive".into()));
        }
        if self.provisioning.provider == ProviderKind::Mtproto
            && (self.telegram.api_id == 0 || self.telegram.api_hash.is_empty())
        {
            return Err(Error::Config(
                "telegram.api_id and telegram.api_hash (API_ID / API_HASH) are required".into(),
            ));
        }
        if self.storage.encryption_key.is_none() {
            return Err(Error::Config(
                "storage.encryption_key (ENCRYPTION_KEY) is required; create one with `tsp-gateway gen-key`"
                    .into(),
            ));
        }
        if self.storage.backend == StorageBackendKind::S3 {
            let s3 = self
                .storage
                .s3
                .as_ref()
                .ok_or_else(|| Error::Config("storage.backend = \"s3\" needs a [storage.s3] section".into()))?;
            if s3.endpoint.is_empty() || s3.bucket.is_empty() {
                return Err(Error::Config("storage.s3.endpoint and storage.s3.bucket are required".into()));
            }
        }
        Ok(())
    }

    /// Check what the bot needs: a token and at least one admin
    pub fn validate_bot(&self) -> crate::Result<()> {
        if self.telegram.bot_token.is_none() {
            return Err(Error::Config("telegram.bot_token (BOT_TOKEN) is required".into()));
        }
        if self.telegram.admin_user_ids.is_empty() {
            return Err(Error::Config(
                "telegram.admin_user_ids (ADMIN_IDS) must list at least one user".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.provisioning.max_attempts, 3);
        assert_eq!(config.provisioning.request_ttl_secs, 300);
        assert_eq!(config.provisioning.provider, ProviderKind::Mtproto);
        assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
        assert_eq!(config.storage.db_path, "data/tsp-gateway.db");
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("TSP_GATEWAY_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${TSP_GATEWAY_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${TSP_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("TSP_GATEWAY_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_$here"), "no_vars_$here");
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[telegram]
api_id = 12345
api_hash = "abcdef"
bot_token = "123:abc"
admin_user_ids = [111, 222]

[api]
port = 9000
key = "secret"

[provisioning]
max_attempts = 5
request_ttl_secs = 120
provider = "mock"

[provisioning.retry]
max_retries = 1

[storage]
backend = "s3"
encryption_key = "a2V5"

[storage.s3]
endpoint = "http://minio:9000"
bucket = "sessions"
access_key_id = "id"
secret_access_key = "secret"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();

        assert_eq!(config.telegram.api_id, 12345);
        assert_eq!(config.telegram.admin_user_ids, vec![111, 222]);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.provisioning.max_attempts, 5);
        assert_eq!(config.provisioning.provider, ProviderKind::Mock);
        assert_eq!(config.provisioning.retry.max_retries, 1);
        assert_eq!(config.provisioning.retry.max_delay_ms, 30_000);
        assert_eq!(config.storage.backend, StorageBackendKind::S3);

        let s3 = config.storage.s3.as_ref().unwrap();
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.prefix, "sessions");
        assert!(config.validate_server().is_ok());
    }

    #[test]
    fn test_validate_requires_encryption_key() {
        let mut config = Config::default();
        config.provisioning.provider = ProviderKind::Mock;
        assert!(config.validate_server().is_err());

        config.storage.encryption_key = Some("a2V5".to_string());
        assert!(config.validate_server().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sweep_interval() {
        let mut config = Config::default();
        config.provisioning.provider = ProviderKind::Mock;
        config.storage.encryption_key = Some("a2V5".to_string());
        config.provisioning.sweep_interval_secs = 0;

        let err = config.validate_server().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("sweep_interval_secs")));
    }

    #[test]
    fn test_validate_mtproto_needs_app_credentials() {
        let mut config = Config::default();
        config.storage.encryption_key = Some("a2V5".to_string());
        assert!(config.validate_server().is_err());

        config.telegram.api_id = 1;
        config.telegram.api_hash = "hash".to_string();
        assert!(config.validate_server().is_ok());
    }

    #[test]
    fn test_validate_bot() {
        let mut config = Config::default();
        assert!(config.validate_bot().is_err());

        config.telegram.bot_token = Some("123:abc".to_string());
        config.telegram.admin_user_ids = vec![1];
        assert!(config.validate_bot().is_ok());
    }

    #[test]
    fn test_env_list() {
        assert_eq!(env_list("1, 2,x,3"), vec![1, 2, 3]);
        assert!(env_list("").is_empty());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(StorageBackendKind::parse("S3"), Some(StorageBackendKind::S3));
        assert_eq!(ProviderKind::parse("telegram"), Some(ProviderKind::Mtproto));
        assert_eq!(ProviderKind::parse("other"), None);
    }
}
