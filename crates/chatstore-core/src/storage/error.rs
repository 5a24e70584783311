//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `Serialization`: Failed to encode/decode a stored message
//! - `Io`: Underlying storage system errors
//! - `Poisoned`: A lock guarding in-memory state was poisoned
//!
//! An unknown room or user is never an error; it reads as empty.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// A thread panicked while holding a storage lock
    #[error("storage lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
