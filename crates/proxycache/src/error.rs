use std::io;

/// Error type shared by the cache, source, engine and response layers.
#[derive(Debug, thiserror::Error)]
pub enum ProxyCacheError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Source I/O error: {0}")]
    SourceIo(String),

    #[error("Error reading source {attempts} times")]
    SourceRead { attempts: u32 },

    #[error("Cache state error: {0}")]
    CacheState(String),

    #[error("Metadata storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyCacheError>;
