use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Transient fetch failure for {id}: {reason}")]
    TransientFetch { id: String, reason: String },

    #[error("Store unavailable for key {key}: {reason}")]
    StoreUnavailable { key: String, reason: String },

    #[error("Record store error: {0}")]
    Records(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cancelled before completion")]
    Cancelled,

    #[error("Invalid external file id: {0}")]
    InvalidId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl IngestError {
    pub fn transient(id: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::TransientFetch {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn store(key: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::StoreUnavailable {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether redelivering the message may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::TransientFetch { .. }
                | IngestError::StoreUnavailable { .. }
                | IngestError::Records(_)
                | IngestError::Transport(_)
                | IngestError::Cancelled
                | IngestError::Http(_)
                | IngestError::Io(_)
                | IngestError::Sqlite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
