//! Storage abstraction for room history and unread sets
//!
//! Trait-based abstraction for persisting messages. The trait is synchronous
//! (no async); the store runs calls on tokio's blocking pool so a backend may
//! block on disk I/O freely.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;
use crate::{config::BackendConfig, message::Message};

/// Storage abstraction for room logs and per-user unread sets
///
/// Must be Clone (shared between the store and blocking tasks), Send + Sync
/// (thread-safe), and synchronous. Implementations share internal state via
/// Arc, so clones access the same underlying storage.
///
/// Every method is atomic: it either fully applies or, on error, leaves the
/// stored data unchanged.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Append a message to a room's log.
    ///
    /// Returns the sequence number assigned to the message within the room.
    ///
    /// # Invariants
    ///
    /// - Post: the room holds at most `max(retention, 1)` messages, oldest
    ///   evicted first
    /// - Post: sequence numbers within a room strictly increase
    fn append_message(
        &self,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<u64, StorageError>;

    /// Up to `limit` most recent messages of a room, newest first.
    ///
    /// Returns an empty vector for unknown rooms.
    fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StorageError>;

    /// Number of messages currently retained for a room.
    fn message_count(&self, room_id: &str) -> Result<usize, StorageError>;

    /// List all rooms that have ever stored a message. Order is not
    /// guaranteed.
    fn list_rooms(&self) -> Result<Vec<String>, StorageError>;

    /// Add a message to a user's unread set.
    ///
    /// Returns `false` if a message with the same id was already unread.
    fn add_unread(&self, user_id: &str, message: &Message) -> Result<bool, StorageError>;

    /// A user's unread messages, oldest first.
    fn unread_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Remove every unread message of a user. Returns how many were removed.
    fn clear_unread(&self, user_id: &str) -> Result<usize, StorageError>;

    /// Return and remove a user's unread messages in one atomic step.
    fn take_unread(&self, user_id: &str) -> Result<Vec<Message>, StorageError>;
}

/// Runtime-selected storage backend.
///
/// Lets configuration pick the backend while the store stays generic over
/// [`Storage`].
#[derive(Clone)]
pub enum Backend {
    /// Volatile in-memory storage
    Memory(MemoryStorage),
    /// Durable redb storage
    Redb(RedbStorage),
}

impl Backend {
    /// Open the backend described by the configuration.
    pub fn open(config: &BackendConfig) -> Result<Self, StorageError> {
        match config {
            BackendConfig::Memory => Ok(Self::Memory(MemoryStorage::new())),
            BackendConfig::Redb { path } => Ok(Self::Redb(RedbStorage::open(path)?)),
        }
    }

    /// Short backend name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redb(_) => "redb",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $storage:ident => $call:expr) => {
        match $self {
            Backend::Memory($storage) => $call,
            Backend::Redb($storage) => $call,
        }
    };
}

impl Storage for Backend {
    fn append_message(
        &self,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<u64, StorageError> {
        dispatch!(self, s => s.append_message(room_id, message, retention))
    }

    fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        dispatch!(self, s => s.recent_messages(room_id, limit))
    }

    fn message_count(&self, room_id: &str) -> Result<usize, StorageError> {
        dispatch!(self, s => s.message_count(room_id))
    }

    fn list_rooms(&self) -> Result<Vec<String>, StorageError> {
        dispatch!(self, s => s.list_rooms())
    }

    fn add_unread(&self, user_id: &str, message: &Message) -> Result<bool, StorageError> {
        dispatch!(self, s => s.add_unread(user_id, message))
    }

    fn unread_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        dispatch!(self, s => s.unread_messages(user_id))
    }

    fn clear_unread(&self, user_id: &str) -> Result<usize, StorageError> {
        dispatch!(self, s => s.clear_unread(user_id))
    }

    fn take_unread(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        dispatch!(self, s => s.take_unread(user_id))
    }
}
