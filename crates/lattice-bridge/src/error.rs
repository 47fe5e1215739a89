//! Lattice bridge error types

use thiserror::Error;

/// Publishing errors
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request {method} {endpoint} failed with status {status}")]
    Status {
        method: &'static str,
        endpoint: String,
        status: u16,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Entity refused by the remote end
    #[error("Entity rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for LatticeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LatticeError>;
