//! Configuration types.
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file). The transport and generation credentials are required; the rest
//! have defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default primary model for the generation gateway.
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default reference time zone for reminders and displayed timestamps.
pub const DEFAULT_TIMEZONE: &str = "Europe/Kyiv";

/// Shortest practice a user can ask for, in minutes.
pub const MIN_PRACTICE_MINUTES: u32 = 5;

/// Longest practice a user can ask for, in minutes.
pub const MAX_PRACTICE_MINUTES: u32 = 60;

/// Generation gateway configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Caller-side timeout wrapped around every generation call.
    pub generation_timeout: Duration,
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: SecretString,
    pub llm: LlmConfig,
    pub database_path: PathBuf,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<PathBuf>,
    pub timezone: Tz,
}

impl BotConfig {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present;
    /// variables already set in the environment take precedence.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let api_key = get("OPENROUTER_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".into()))?;

        let timezone_name = get("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "TIMEZONE".into(),
                message: format!("{timezone_name}: {e}"),
            })?;

        let timeout_secs: u64 =
            parse_or("GENERATION_TIMEOUT_SECS", get("GENERATION_TIMEOUT_SECS"), 120)?;

        let llm = LlmConfig {
            api_key,
            base_url: get("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parse_or("MAX_TOKENS", get("MAX_TOKENS"), 2000)?,
            temperature: parse_or("TEMPERATURE", get("TEMPERATURE"), 0.7)?,
            generation_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            telegram_token,
            llm,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/yoga-assist.db")),
            log_level: get("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            timezone,
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{value}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("OPENROUTER_API_KEY", "sk-or-test"),
    ];

    #[test]
    fn defaults_applied() {
        let config = BotConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.telegram_token.expose_secret(), "123:abc");
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.llm.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.llm.max_tokens, 2000);
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.llm.generation_timeout, Duration::from_secs(120));
        assert_eq!(config.timezone, chrono_tz::Europe::Kyiv);
        assert_eq!(config.log_level, "info");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_transport_token_is_fatal() {
        let err = BotConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "k")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn missing_gateway_key_is_fatal() {
        let err = BotConfig::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENROUTER_API_KEY"));
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let err = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "  "),
            ("OPENROUTER_API_KEY", "k"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn overrides_are_read() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("OPENROUTER_MODEL", "meta-llama/llama-3-8b-instruct:free"),
            ("OPENROUTER_BASE_URL", "http://localhost:9000/v1/"),
            ("TIMEZONE", "UTC"),
            ("LOG_LEVEL", "DEBUG"),
            ("GENERATION_TIMEOUT_SECS", "30"),
            ("DATABASE_PATH", "/tmp/yoga.db"),
        ]);
        let config = BotConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.llm.model, "meta-llama/llama-3-8b-instruct:free");
        assert_eq!(config.llm.base_url, "http://localhost:9000/v1");
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.llm.generation_timeout, Duration::from_secs(30));
        assert_eq!(config.database_path, PathBuf::from("/tmp/yoga.db"));
    }

    #[test]
    fn invalid_timezone_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TIMEZONE", "Mars/Olympus_Mons"));
        let err = BotConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TIMEZONE"));
    }

    #[test]
    fn invalid_number_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_TOKENS", "lots"));
        let err = BotConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAX_TOKENS"));
    }
}
