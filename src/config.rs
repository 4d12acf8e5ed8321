//! # Configuration Module
//!
//! Runtime settings read from the environment (after loading an optional `.env`).
//! Missing optional values take defaults; malformed values are errors.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Largest accepted voice upload, the transcription API limit
pub const MAX_AUDIO_FILE_SIZE: usize = 25 * 1024 * 1024;

/// Settings of the external transcription and scoring service
#[derive(Clone)]
pub struct AnalysisConfig {
    /// API key; analysis is disabled without one
    pub api_key: Option<String>,
    pub base_url: String,
    /// Timeout of each API call in seconds
    pub timeout_secs: u64,
    /// Failures before calls are suspended
    pub circuit_breaker_threshold: u32,
    /// Seconds before a suspended client tries again
    pub circuit_breaker_reset_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout_secs: 60,
            circuit_breaker_threshold: 3,
            circuit_breaker_reset_secs: 120,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field("circuit_breaker_reset_secs", &self.circuit_breaker_reset_secs)
            .finish()
    }
}

/// Admin console login
#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl AdminCredentials {
    pub fn is_default(&self) -> bool {
        self.username == DEFAULT_ADMIN_USERNAME && self.password == DEFAULT_ADMIN_PASSWORD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub database_url: Option<String>,
    pub customer_bot_token: Option<String>,
    pub provider_bot_token: Option<String>,
    pub admin_chat_id: Option<i64>,
    /// Chats allowed to use the provider bot; empty admits everyone
    pub provider_chat_ids: Vec<i64>,
    pub admin: AdminCredentials,
    pub session_ttl_secs: u64,
    /// Provider share of completed revenue, in percent
    pub master_share_percent: f64,
    pub analysis: AnalysisConfig,
    pub upload_dir: PathBuf,
    pub locale: String,
    pub log_format: LogFormat,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("AppConfig")
            .field("bind_address", &self.bind_address)
            .field("database_url", &redacted(&self.database_url))
            .field("customer_bot_token", &redacted(&self.customer_bot_token))
            .field("provider_bot_token", &redacted(&self.provider_bot_token))
            .field("admin_chat_id", &self.admin_chat_id)
            .field("provider_chat_ids", &self.provider_chat_ids)
            .field("admin", &self.admin)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("master_share_percent", &self.master_share_percent)
            .field("analysis", &self.analysis)
            .field("upload_dir", &self.upload_dir)
            .field("locale", &self.locale)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            database_url: None,
            customer_bot_token: None,
            provider_bot_token: None,
            admin_chat_id: None,
            provider_chat_ids: Vec::new(),
            admin: AdminCredentials {
                username: DEFAULT_ADMIN_USERNAME.to_string(),
                password: DEFAULT_ADMIN_PASSWORD.to_string(),
            },
            session_ttl_secs: 3600,
            master_share_percent: 30.0,
            analysis: AnalysisConfig::default(),
            upload_dir: PathBuf::from("./uploads"),
            locale: crate::localization::DEFAULT_LANGUAGE.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let master_share_percent: f64 =
            parse_or(get("MASTER_SHARE_PERCENT"), "MASTER_SHARE_PERCENT", defaults.master_share_percent)?;
        if !(0.0..=100.0).contains(&master_share_percent) {
            bail!("MASTER_SHARE_PERCENT must be between 0 and 100, got {master_share_percent}");
        }

        let locale = get("BOT_LOCALE").unwrap_or(defaults.locale);
        if !crate::localization::get_localization_manager().has_language(&locale) {
            bail!("BOT_LOCALE '{locale}' has no message catalogue");
        }

        let provider_chat_ids = match get("PROVIDER_CHAT_IDS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    id.parse::<i64>()
                        .with_context(|| format!("Invalid chat id '{id}' in PROVIDER_CHAT_IDS"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: get("DATABASE_URL"),
            customer_bot_token: get("TELEGRAM_BOT_TOKEN"),
            provider_bot_token: get("TELEGRAM_MASTER_BOT_TOKEN"),
            admin_chat_id: parse_opt(get("TELEGRAM_ADMIN_CHAT_ID"), "TELEGRAM_ADMIN_CHAT_ID")?,
            provider_chat_ids,
            admin: AdminCredentials {
                username: get("ADMIN_USERNAME").unwrap_or(defaults.admin.username),
                password: get("ADMIN_PASSWORD").unwrap_or(defaults.admin.password),
            },
            session_ttl_secs: parse_or(
                get("ADMIN_SESSION_TTL_SECS"),
                "ADMIN_SESSION_TTL_SECS",
                defaults.session_ttl_secs,
            )?,
            master_share_percent,
            analysis: AnalysisConfig {
                api_key: get("OPENAI_API_KEY"),
                base_url: get("OPENAI_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.analysis.base_url),
                timeout_secs: parse_or(
                    get("ANALYSIS_TIMEOUT_SECS"),
                    "ANALYSIS_TIMEOUT_SECS",
                    defaults.analysis.timeout_secs,
                )?,
                ..defaults.analysis
            },
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            locale,
            log_format: match get("LOG_FORMAT").as_deref() {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        })
    }
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(value, name)?.unwrap_or(default))
}

fn parse_opt<T>(value: Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value '{raw}' for {name}"))
        })
        .transpose()
}
