//! Error types for Crosscast

use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, CrosscastError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CrosscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosscastError::InvalidInput(_) => 3,
            CrosscastError::Unauthorized(_) => 2,
            CrosscastError::Config(_) => 2,
            CrosscastError::Credential(CredentialError::Missing { .. })
            | CrosscastError::Credential(CredentialError::Expired { .. }) => 2,
            CrosscastError::Credential(_) => 1,
            CrosscastError::Http(_) => 1,
            CrosscastError::Database(_) => 1,
            CrosscastError::Output(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stored value could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Failures of the token lifecycle layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("No {platform} account connected for user {user_id}. Reconnect the account to publish.")]
    Missing { platform: Platform, user_id: String },

    #[error("{platform} authorization has expired or was revoked ({reason}). Reconnect the account.")]
    Expired { platform: Platform, reason: String },

    #[error("{platform} token refresh failed temporarily: {reason}")]
    RefreshTransient { platform: Platform, reason: String },

    #[error("Credential store failure: {0}")]
    Store(String),
}

impl CredentialError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CredentialError::RefreshTransient { .. } | CredentialError::Store(_)
        )
    }
}

/// Errors surfaced by the rate-limited HTTP client after retries are exhausted
#[derive(Error, Debug)]
pub enum HttpError {
    /// Built through `From`, which strips the request URL so query
    /// credentials never reach messages or logs
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("server error {status}: {body}")]
    Server {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request admission closed")]
    AdmissionClosed,
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        HttpError::Transport(e.without_url())
    }
}

impl HttpError {
    /// Network failures and 5xx responses are retried; everything else is final
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            HttpError::Server { .. } => true,
            HttpError::AdmissionClosed => false,
        }
    }
}
