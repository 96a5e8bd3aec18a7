use thiserror::Error;

use crate::db::Channel;

/// Errors returned by the notification services
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{channel} config {id} is used by notification settings")]
    InUse { channel: Channel, id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("Failed to process stored secret: {0}")]
    Crypto(String),

    #[error("Invalid stored notification config: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifierError {
    pub fn not_found(what: impl std::fmt::Display, id: i64) -> Self {
        Self::NotFound(format!("{} {}", what, id))
    }
}

impl From<anyhow::Error> for NotifierError {
    fn from(err: anyhow::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}
