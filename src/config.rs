use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend '{}', expected postgres or memory", other),
        }
    }
}

/// Process configuration. Built once by [`load`] and passed down explicitly;
/// nothing reads the environment after startup.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: String,
    pub telegram_bot_token: Option<String>,
    /// Chat the approval messages are posted to.
    pub telegram_chat_id: Option<String>,
    pub telegram_api_base: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook calls.
    pub telegram_webhook_secret: Option<String>,
    /// Public URL Telegram should call; only needed by `set-webhook`.
    pub public_webhook_url: Option<String>,
    pub backend_callback_url: Option<String>,
    pub backend_signing_secret: Option<String>,
    pub expiry_window: chrono::Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            store: StoreBackend::Postgres,
            database_url: "postgres://localhost/approval_relay".into(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: "https://api.telegram.org".into(),
            telegram_webhook_secret: None,
            public_webhook_url: None,
            backend_callback_url: None,
            backend_signing_secret: None,
            expiry_window: chrono::Duration::minutes(15),
            sweep_interval: Duration::from_secs(60),
            sweep_batch_size: 500,
        }
    }
}

impl Config {
    pub fn bot_token(&self) -> anyhow::Result<&str> {
        self.telegram_bot_token
            .as_deref()
            .context("TELEGRAM_BOT_TOKEN is not set")
    }

    pub fn chat_id(&self) -> anyhow::Result<&str> {
        self.telegram_chat_id
            .as_deref()
            .context("TELEGRAM_CHAT_ID is not set")
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let store = match std::env::var("RELAY_STORE") {
        Ok(v) => v.parse()?,
        Err(_) => defaults.store,
    };

    let telegram_api_base = std::env::var("TELEGRAM_API_BASE")
        .unwrap_or(defaults.telegram_api_base);
    validate_url("TELEGRAM_API_BASE", &telegram_api_base)?;

    let public_webhook_url = non_empty_var("PUBLIC_WEBHOOK_URL");
    if let Some(u) = &public_webhook_url {
        validate_url("PUBLIC_WEBHOOK_URL", u)?;
    }

    let backend_callback_url = non_empty_var("BACKEND_CALLBACK_URL");
    match &backend_callback_url {
        Some(u) => validate_url("BACKEND_CALLBACK_URL", u)?,
        None => tracing::warn!("BACKEND_CALLBACK_URL is not set, decision events will not be forwarded"),
    }

    let expiry_minutes = parse_var("RELAY_EXPIRY_MINUTES", 15i64)?;
    if expiry_minutes <= 0 {
        anyhow::bail!("RELAY_EXPIRY_MINUTES must be positive, got {}", expiry_minutes);
    }
    let sweep_secs = parse_var("RELAY_SWEEP_INTERVAL_SECS", 60u64)?.max(1);

    Ok(Config {
        port: parse_var("RELAY_PORT", defaults.port)?,
        store,
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        telegram_bot_token: non_empty_var("TELEGRAM_BOT_TOKEN"),
        telegram_chat_id: non_empty_var("TELEGRAM_CHAT_ID"),
        telegram_api_base,
        telegram_webhook_secret: non_empty_var("TELEGRAM_WEBHOOK_SECRET"),
        public_webhook_url,
        backend_callback_url,
        backend_signing_secret: non_empty_var("BACKEND_SIGNING_SECRET"),
        expiry_window: chrono::Duration::minutes(expiry_minutes),
        sweep_interval: Duration::from_secs(sweep_secs),
        sweep_batch_size: parse_var("RELAY_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?.max(1),
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e)),
        None => Ok(default),
    }
}

fn validate_url(name: &str, raw: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(raw).with_context(|| format!("{} is not a valid URL", name))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must be an http(s) URL, got scheme '{}'", name, parsed.scheme());
    }
    Ok(())
}
