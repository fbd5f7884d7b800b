//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::gateway::ClassifierBackend;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the webhook server listens on.
    pub port: u16,
    /// Static bearer token expected on every webhook request.
    pub webhook_token: SecretString,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Base URL of the WhatsApp gateway used for outbound acks.
    pub wa_gateway_url: String,
    /// Token for the WhatsApp gateway.
    pub wa_gateway_token: SecretString,
    /// Device id registered with the WhatsApp gateway.
    pub wa_device_id: String,
    /// Dedup window for the idempotency ledger.
    pub dedup_window: Duration,
    /// TTL for conversation contexts set by outbound prompts.
    pub context_ttl: Duration,
    /// Intent classifier settings.
    pub classifier: ClassifierConfig,
}

/// Intent classifier settings.
///
/// `enabled` is carried into each request via `AppState` — never a process
/// global — so tests can exercise both branches deterministically.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub backend: ClassifierBackend,
    pub api_key: SecretString,
    pub model: String,
    /// Bound on the blocking classifier call; on timeout the router falls
    /// back to the generic acknowledgement.
    pub timeout: Duration,
    /// How many recent conversation messages to include as context.
    pub history_limit: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: ClassifierBackend::Anthropic,
            api_key: SecretString::from(""),
            model: "claude-sonnet-4-20250514".to_string(),
            timeout: Duration::from_secs(12),
            history_limit: 10,
        }
    }
}

impl AppConfig {
    /// Read configuration from environment variables.
    ///
    /// Required: `KAWAL_WEBHOOK_TOKEN`. Everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_token = std::env::var("KAWAL_WEBHOOK_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("KAWAL_WEBHOOK_TOKEN".into()))?;

        let port = env_parse("KAWAL_PORT", 8089u16)?;
        let db_path =
            std::env::var("KAWAL_DB_PATH").unwrap_or_else(|_| "./data/kawal-obat.db".to_string());

        let wa_gateway_url = std::env::var("KAWAL_WA_GATEWAY_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let wa_gateway_token =
            SecretString::from(std::env::var("KAWAL_WA_GATEWAY_TOKEN").unwrap_or_default());
        let wa_device_id = std::env::var("KAWAL_WA_DEVICE_ID").unwrap_or_default();

        let dedup_window = Duration::from_secs(env_parse("KAWAL_DEDUP_WINDOW_SECS", 86_400u64)?);
        let context_ttl = Duration::from_secs(env_parse("KAWAL_CONTEXT_TTL_SECS", 1_800u64)?);

        let classifier = ClassifierConfig {
            enabled: env_parse("KAWAL_CLASSIFIER_ENABLED", true)?,
            backend: match std::env::var("KAWAL_CLASSIFIER_BACKEND").as_deref() {
                Ok("openai") => ClassifierBackend::OpenAi,
                _ => ClassifierBackend::Anthropic,
            },
            api_key: SecretString::from(std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()),
            model: std::env::var("KAWAL_CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            timeout: Duration::from_secs(env_parse("KAWAL_CLASSIFIER_TIMEOUT_SECS", 12u64)?),
            history_limit: env_parse("KAWAL_CLASSIFIER_HISTORY_LIMIT", 10usize)?,
        };

        Ok(Self {
            port,
            webhook_token: SecretString::from(webhook_token),
            db_path,
            wa_gateway_url,
            wa_gateway_token,
            wa_device_id,
            dedup_window,
            context_ttl,
            classifier,
        })
    }
}

/// Parse an env var with a typed default.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
