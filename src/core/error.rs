//! Error types for the terrain pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Invalid asset, configuration or platform limit. Fatal at setup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An append buffer exceeded its fixed allocation.
    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
