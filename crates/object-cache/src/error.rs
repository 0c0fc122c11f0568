//! Error types for the object cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// Disk read or write failure
    Io(Box<std::io::Error>),
    /// Stored bytes could not be decoded into the requested type
    Decode(String),
    /// A value could not be encoded before being stored
    Encode(String),
    /// Fetching a remote resource failed
    Fetch(String),
    /// Keys must be non-empty
    InvalidKey(String),
    /// Cache names must be a single path component
    InvalidName(String),
    /// A background task panicked or was cancelled
    Task(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CacheError::Encode(msg) => write!(f, "Encode error: {}", msg),
            CacheError::Fetch(msg) => write!(f, "Fetch error: {}", msg),
            CacheError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            CacheError::InvalidName(msg) => write!(f, "Invalid cache name: {}", msg),
            CacheError::Task(msg) => write!(f, "Task error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<tempfile::PersistError> for CacheError {
    fn from(err: tempfile::PersistError) -> Self {
        CacheError::Io(Box::new(err.error))
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
