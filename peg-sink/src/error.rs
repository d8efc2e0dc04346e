use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not reach {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("{endpoint} answered {status}: {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("invalid experiment id {0:?}")]
    InvalidId(String),
}
