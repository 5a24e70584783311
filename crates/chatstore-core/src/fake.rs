//! Recording [`ChatStore`] for testing code that depends on a store.
//!
//! Records every call in order, answers reads from canned data and can be
//! told to fail specific operations.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    context::Context,
    error::StoreError,
    message::Message,
    storage::StorageError,
    store::ChatStore,
};

/// Store operation, for selecting injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `publish_message`
    Publish,
    /// `save_message`
    Save,
    /// `get_messages`
    GetMessages,
    /// `save_unread`
    SaveUnread,
    /// `get_unread_messages`
    GetUnread,
    /// `clear_unread`
    ClearUnread,
}

/// A recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `publish_message(room_id, message)`
    Publish {
        /// Room
        room_id: String,
        /// Published message
        message: Message,
    },
    /// `save_message(room_id, message, retention)`
    Save {
        /// Room
        room_id: String,
        /// Saved message
        message: Message,
        /// Requested retention
        retention: usize,
    },
    /// `get_messages(room_id, limit)`
    GetMessages {
        /// Room
        room_id: String,
        /// Requested limit
        limit: usize,
    },
    /// `save_unread(user_id, message)`
    SaveUnread {
        /// User
        user_id: String,
        /// Saved message
        message: Message,
    },
    /// `get_unread_messages(user_id)`
    GetUnread {
        /// User
        user_id: String,
    },
    /// `clear_unread(user_id)`
    ClearUnread {
        /// User
        user_id: String,
    },
}

impl Call {
    /// The operation this call belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Publish { .. } => Operation::Publish,
            Self::Save { .. } => Operation::Save,
            Self::GetMessages { .. } => Operation::GetMessages,
            Self::SaveUnread { .. } => Operation::SaveUnread,
            Self::GetUnread { .. } => Operation::GetUnread,
            Self::ClearUnread { .. } => Operation::ClearUnread,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    history: HashMap<String, Vec<Message>>,
    unread: HashMap<String, Vec<Message>>,
    failing: HashSet<Operation>,
}

/// [`ChatStore`] that records calls and returns canned results.
///
/// Writes are recorded but do not change the canned data; `get_messages`
/// and `get_unread_messages` always return what was configured with
/// [`RecordingStore::with_history`] and [`RecordingStore::with_unread`].
/// Clones share state.
#[derive(Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<State>>,
}

impl RecordingStore {
    /// Empty store: every read returns an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned history for a room, newest first.
    #[must_use]
    pub fn with_history(self, room_id: &str, messages: Vec<Message>) -> Self {
        self.with_state(|state| {
            state.history.insert(room_id.to_owned(), messages);
        });
        self
    }

    /// Canned unread messages for a user, oldest first.
    #[must_use]
    pub fn with_unread(self, user_id: &str, messages: Vec<Message>) -> Self {
        self.with_state(|state| {
            state.unread.insert(user_id.to_owned(), messages);
        });
        self
    }

    /// Make every call of `operation` fail with a storage I/O error.
    pub fn fail(&self, operation: Operation) {
        self.with_state(|state| {
            state.failing.insert(operation);
        });
    }

    /// Stop failing `operation`.
    pub fn recover(&self, operation: Operation) {
        self.with_state(|state| {
            state.failing.remove(&operation);
        });
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|state| state.calls.clone())
    }

    /// Calls of one operation, in order.
    pub fn calls_of(&self, operation: Operation) -> Vec<Call> {
        self.with_state(|state| {
            state.calls.iter().filter(|c| c.operation() == operation).cloned().collect()
        })
    }

    #[allow(clippy::expect_used)]
    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("RecordingStore mutex poisoned");
        f(&mut state)
    }

    fn record(&self, ctx: &Context, call: Call) -> Result<(), StoreError> {
        ctx.check()?;
        self.with_state(|state| {
            let operation = call.operation();
            state.calls.push(call);
            if state.failing.contains(&operation) {
                return Err(StoreError::Storage(StorageError::Io(format!(
                    "injected failure: {operation:?}"
                ))));
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for RecordingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatStore for RecordingStore {
    async fn publish_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
    ) -> Result<(), StoreError> {
        self.record(ctx, Call::Publish { room_id: room_id.to_owned(), message: message.clone() })
    }

    async fn save_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<(), StoreError> {
        self.record(ctx, Call::Save {
            room_id: room_id.to_owned(),
            message: message.clone(),
            retention,
        })
    }

    async fn get_messages(
        &self,
        ctx: &Context,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.record(ctx, Call::GetMessages { room_id: room_id.to_owned(), limit })?;
        Ok(self.with_state(|state| {
            state
                .history
                .get(room_id)
                .map(|messages| messages.iter().take(limit).cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn save_unread(
        &self,
        ctx: &Context,
        user_id: &str,
        message: &Message,
    ) -> Result<(), StoreError> {
        self.record(ctx, Call::SaveUnread { user_id: user_id.to_owned(), message: message.clone() })
    }

    async fn get_unread_messages(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.record(ctx, Call::GetUnread { user_id: user_id.to_owned() })?;
        Ok(self.with_state(|state| state.unread.get(user_id).cloned().unwrap_or_default()))
    }

    async fn clear_unread(&self, ctx: &Context, user_id: &str) -> Result<(), StoreError> {
        self.record(ctx, Call::ClearUnread { user_id: user_id.to_owned() })
    }
}
