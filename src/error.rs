//! Error types for Yoga Assist.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Generation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("No candidate models configured")]
    NoCandidates,
}

impl LlmError {
    /// Whether the provider signalled a rate limit. HTTP 429 arrives as
    /// `RateLimited`; a failure body that only mentions a rate limit in its
    /// message also counts. Status codes inside other messages do not.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::RequestFailed { reason, .. } => {
                reason.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

/// Reminder scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid reminder time: {0}")]
    InvalidTime(String),

    #[error("Invalid schedule expression {expression}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("No upcoming fire time for {0}")]
    NoUpcomingFire(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
