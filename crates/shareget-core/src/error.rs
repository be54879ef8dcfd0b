//! Error types for shareget core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in shareget core
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Cannot use directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ShareError {
    /// Errors the run initiator has to act on, as opposed to per-request
    /// failures that are absorbed into run events
    pub fn is_configuration(&self) -> bool {
        matches!(self, ShareError::NoEndpoints | ShareError::InvalidEndpoint(_))
    }
}
