//! Error types for the weather bot.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("Dialog error: {0}")]
    Dialog(#[from] DialogError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors. Any of these means the store is unavailable
/// for the current operation only.
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

/// Failures reported by the messaging platform for a single call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// Flood control. The platform asks us to wait before trying again.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The recipient blocked the bot or the account no longer exists.
    #[error("Recipient unreachable: {reason}")]
    Undeliverable { reason: String },

    /// The message to edit or delete is already gone.
    #[error("Message not found or cannot be deleted")]
    MessageGone,

    #[error("Delivery failed: {reason}")]
    Failed { reason: String },
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Undeliverable { .. })
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::MessageGone)
    }
}

/// Weather service errors. An empty lookup is not one of these.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Weather request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Weather service returned status {status}")]
    Status { status: u16 },

    #[error("Invalid response from weather service: {reason}")]
    InvalidResponse { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
            },
            None => Self::RequestFailed {
                reason: e.to_string(),
            },
        }
    }
}

/// Dialog session errors.
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("Input {shape} is not accepted in state {state}")]
    Rejected { state: String, shape: String },

    #[error("City lookup failed: {0}")]
    LookupFailed(#[source] WeatherError),

    #[error("Store unavailable: {0}")]
    Store(#[from] DatabaseError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
