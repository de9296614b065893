use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CONTEXT_LIMIT: usize = 10;

/// Root configuration for relaybot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub messenger: MessengerConfig,
    pub admin: AdminConfig,
    pub bot: BotConfig,
}

impl Config {
    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://users.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessengerConfig {
    pub page_access_token: String,
    pub verify_token: String,
    pub graph_api_base: String,
    pub send_timeout_secs: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            page_access_token: String::new(),
            verify_token: String::new(),
            graph_api_base: "https://graph.facebook.com/v18.0".to_string(),
            send_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct AdminConfig {
    pub password: String,
}

/// Prompts, canned replies and routing phrases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    pub system_prompt: String,
    pub fallback_reply: String,
    pub human_support_reply: String,
    pub service_info_reply: String,
    pub human_support_title: String,
    pub service_info_title: String,
    pub support_triggers: Vec<String>,
    pub context_limit: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            system_prompt: "أجب بإيجاز وبأسلوب ودود.".to_string(),
            fallback_reply: "عذرًا، تعذّر الردّ حاليًا.".to_string(),
            human_support_reply: "تم تحويلك للدعم البشري، يرجى الانتظار.".to_string(),
            service_info_reply: "نقدم خدماتنا على مدار الساعة. كيف أساعدك؟".to_string(),
            human_support_title: "دعم بشري".to_string(),
            service_info_title: "معلومات عن الخدمات".to_string(),
            support_triggers: vec![
                "دعم بشري".to_string(),
                "موظف".to_string(),
                "مساعدة حقيقية".to_string(),
                "تحدث إلى شخص".to_string(),
            ],
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }
}

// ====== Config loading ======

/// Environment variables that must be present and non-empty.
pub const REQUIRED_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "PAGE_ACCESS_TOKEN",
    "VERIFY_TOKEN",
    "ADMIN_PASSWORD",
];

/// Load configuration from the process environment.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    load_config_with(|key| std::env::var(key).ok())
}

/// Load configuration from an arbitrary variable lookup.
///
/// Every missing required variable is reported at once. Optional variables
/// fall back to defaults; a present but unparseable value is an error.
pub fn load_config_with<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let missing: Vec<String> = REQUIRED_VARS
        .iter()
        .copied()
        .filter(|&key| get(key).is_none())
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let mut cfg = Config::default();

    // Required secrets
    cfg.provider.api_key = get("OPENAI_API_KEY").unwrap_or_default();
    cfg.messenger.page_access_token = get("PAGE_ACCESS_TOKEN").unwrap_or_default();
    cfg.messenger.verify_token = get("VERIFY_TOKEN").unwrap_or_default();
    cfg.admin.password = get("ADMIN_PASSWORD").unwrap_or_default();

    // Server
    if let Some(v) = get("HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = get("PORT") {
        cfg.server.port = parse_var("PORT", &v)?;
    }
    if let Some(v) = get("DATABASE_URL") {
        cfg.database.url = v;
    }

    // Completion API
    if let Some(v) = get("OPENAI_API_BASE") {
        cfg.provider.api_base = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = get("RELAYBOT_MODEL") {
        cfg.provider.model = v;
    }
    if let Some(v) = get("RELAYBOT_TEMPERATURE") {
        cfg.provider.temperature = parse_var("RELAYBOT_TEMPERATURE", &v)?;
    }

    // Messenger
    if let Some(v) = get("GRAPH_API_BASE") {
        cfg.messenger.graph_api_base = v.trim_end_matches('/').to_string();
    }

    if let Some(v) = get("CONTEXT_LIMIT") {
        let limit: usize = parse_var("CONTEXT_LIMIT", &v)?;
        if limit == 0 {
            return Err(ConfigError::Invalid {
                key: "CONTEXT_LIMIT".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        cfg.bot.context_limit = limit;
    }

    Ok(cfg)
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("{value:?}: {e}"),
    })
}
