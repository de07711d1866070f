//! Error types for the hcloud engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("tile database error: {0}")]
    TileDb(String),

    #[error("streaming error: {0}")]
    Streaming(String),
}
