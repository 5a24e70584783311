//! The chat store: fan-out, history and unread tracking behind one trait.
//!
//! [`ChatStore`] is what the connection layer talks to. [`HubStore`] is the
//! production implementation, combining the in-memory [`Hub`] with a
//! [`Storage`] backend. Storage calls are synchronous, so they run on tokio's
//! blocking pool.
//!
//! # Cancellation
//!
//! Writes check the context once, before they start, and then run to
//! completion: a write either lands entirely or not at all. Reads race the
//! context and return `Cancelled`/`DeadlineExceeded` as soon as it ends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::StoreConfig,
    context::Context,
    error::StoreError,
    hub::{FanOut, Hub, Subscription},
    message::Message,
    storage::{Backend, Storage, StorageError},
};

/// Chat message store.
///
/// All methods are safe to call concurrently from many tasks. Empty rooms and
/// users with nothing unread yield empty results, never errors.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Deliver a message to every live subscriber of a room.
    ///
    /// Best-effort and non-blocking: each subscriber's mailbox either accepts
    /// the message or applies its overflow policy. Cancellation observed
    /// during fan-out stops the remaining hand-offs and is not an error.
    async fn publish_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
    ) -> Result<(), StoreError>;

    /// Append a message to a room's history, keeping at most `retention`
    /// messages (oldest evicted first). A retention of 0 is treated as 1.
    async fn save_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<(), StoreError>;

    /// Up to `limit` most recent messages of a room, newest first.
    async fn get_messages(
        &self,
        ctx: &Context,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Record a message as unread for a user. Saving the same message twice
    /// keeps one entry.
    async fn save_unread(
        &self,
        ctx: &Context,
        user_id: &str,
        message: &Message,
    ) -> Result<(), StoreError>;

    /// A user's unread messages, oldest first.
    async fn get_unread_messages(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    /// Remove every unread message of a user.
    async fn clear_unread(&self, ctx: &Context, user_id: &str) -> Result<(), StoreError>;
}

/// How [`HubStore::route_message`] handled a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Room message: persisted at `seq`, then fanned out
    Room {
        /// Sequence number within the room's log
        seq: u64,
        /// Fan-out report
        fan_out: FanOut,
    },
    /// Direct message: handed to the target's live subscriptions
    Direct {
        /// Fan-out report
        fan_out: FanOut,
        /// No live subscription took it, so it was stored as unread
        stored_unread: bool,
    },
}

/// [`ChatStore`] backed by a [`Hub`] and a [`Storage`] backend.
pub struct HubStore<S> {
    hub: Arc<Hub>,
    storage: S,
    config: StoreConfig,
}

impl HubStore<Backend> {
    /// Build a store with the backend named in `config`.
    pub fn from_config(config: StoreConfig) -> Result<Self, StoreError> {
        let backend = Backend::open(&config.backend)?;
        tracing::info!(
            backend = backend.kind(),
            retention = config.retention,
            subscriber_capacity = config.subscriber_capacity,
            "chat store opened"
        );
        Ok(Self::new(backend, config))
    }
}

impl<S: Storage> HubStore<S> {
    /// Create a store over an existing backend.
    pub fn new(storage: S, config: StoreConfig) -> Self {
        let hub = Hub::new(config.subscriber_capacity, config.overflow_policy);
        Self { hub, storage, config }
    }

    /// The subscriber registry.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe a user to a room and return the room's recent history,
    /// oldest first, capped at `history_limit`.
    ///
    /// The subscription is registered before history is read, so nothing
    /// saved and published concurrently is missed. Such a message may show
    /// up in both the backfill and the subscription; callers de-duplicate by
    /// message id.
    pub async fn join(
        &self,
        ctx: &Context,
        room_id: &str,
        user_id: &str,
    ) -> Result<(Subscription, Vec<Message>), StoreError> {
        ctx.check()?;
        let subscription = self.hub.subscribe(room_id, user_id)?;

        let mut history = self.get_messages(ctx, room_id, self.config.history_limit).await?;
        history.reverse();

        tracing::debug!(room_id, user_id, backfill = history.len(), "user joined room");
        Ok((subscription, history))
    }

    /// Publish to a room and report how the fan-out went.
    pub fn publish(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
    ) -> Result<FanOut, StoreError> {
        let report = self.hub.publish(ctx, room_id, message)?;
        if report.aborted {
            tracing::debug!(
                room_id,
                delivered = report.delivered,
                targeted = report.targeted,
                "fan-out aborted by context"
            );
        }
        Ok(report)
    }

    /// Route a chat message the way a connection handler would.
    ///
    /// Room messages are saved with the configured retention, then
    /// published. A failed save publishes nothing. Direct messages go to
    /// every live subscription of the target user; if none accepts one it is
    /// stored as unread for the target.
    pub async fn route_message(
        &self,
        ctx: &Context,
        message: &Message,
    ) -> Result<Delivery, StoreError> {
        if let Some(target) = message.target.as_deref() {
            let fan_out = self.hub.publish_to_user(ctx, target, message)?;
            let stored_unread = fan_out.delivered == 0;
            if stored_unread {
                self.save_unread(ctx, target, message).await?;
            }
            tracing::debug!(
                user_id = target,
                delivered = fan_out.delivered,
                stored_unread,
                "direct message routed"
            );
            return Ok(Delivery::Direct { fan_out, stored_unread });
        }

        let room_id = message.room_id.clone();
        let retention = self.config.retention;
        let seq = {
            let message = message.clone();
            let room_id = room_id.clone();
            self.write(ctx, move |storage| storage.append_message(&room_id, &message, retention))
                .await?
        };

        // The message is durable now; fan out even if the context ended
        // while the write ran.
        let fan_out = self.publish(&Context::background(), &room_id, message)?;
        Ok(Delivery::Room { seq, fan_out })
    }

    /// Return and clear a user's unread messages in one atomic step.
    ///
    /// A concurrent `save_unread` is either included in the result or
    /// remains stored for next time, never lost.
    pub async fn take_unread(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let user = user_id.to_owned();
        let messages = self.write(ctx, move |storage| storage.take_unread(&user)).await?;
        tracing::debug!(user_id, count = messages.len(), "unread drained");
        Ok(messages)
    }

    /// Run a mutating storage call. The context is checked once up front;
    /// after that the call runs to completion.
    async fn write<T, F>(&self, ctx: &Context, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
    {
        ctx.check()?;
        let storage = self.storage.clone();
        let result = tokio::task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| StoreError::Internal(format!("storage task failed: {e}")))?;
        Ok(result?)
    }

    /// Run a read-only storage call, giving up when the context ends.
    async fn read<T, F>(&self, ctx: &Context, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
    {
        ctx.check()?;
        let storage = self.storage.clone();
        let task = tokio::task::spawn_blocking(move || op(&storage));

        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            joined = task => {
                let result = joined
                    .map_err(|e| StoreError::Internal(format!("storage task failed: {e}")))?;
                Ok(result?)
            },
        }
    }
}

#[async_trait]
impl<S: Storage> ChatStore for HubStore<S> {
    async fn publish_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
    ) -> Result<(), StoreError> {
        self.publish(ctx, room_id, message).map(|_| ())
    }

    async fn save_message(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<(), StoreError> {
        let room = room_id.to_owned();
        let msg = message.clone();
        let seq = self
            .write(ctx, move |storage| storage.append_message(&room, &msg, retention))
            .await
            .inspect_err(|e| tracing::error!(room_id, error = %e, "failed to save message"))?;

        tracing::debug!(room_id, seq, id = %message.id, "message saved");
        Ok(())
    }

    async fn get_messages(
        &self,
        ctx: &Context,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            ctx.check()?;
            return Ok(Vec::new());
        }
        let room = room_id.to_owned();
        self.read(ctx, move |storage| storage.recent_messages(&room, limit)).await
    }

    async fn save_unread(
        &self,
        ctx: &Context,
        user_id: &str,
        message: &Message,
    ) -> Result<(), StoreError> {
        let user = user_id.to_owned();
        let msg = message.clone();
        let added = self
            .write(ctx, move |storage| storage.add_unread(&user, &msg))
            .await
            .inspect_err(|e| tracing::error!(user_id, error = %e, "failed to save unread"))?;

        if !added {
            tracing::debug!(user_id, id = %message.id, "message already unread");
        }
        Ok(())
    }

    async fn get_unread_messages(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let user = user_id.to_owned();
        self.read(ctx, move |storage| storage.unread_messages(&user)).await
    }

    async fn clear_unread(&self, ctx: &Context, user_id: &str) -> Result<(), StoreError> {
        let user = user_id.to_owned();
        let cleared = self.write(ctx, move |storage| storage.clear_unread(&user)).await?;
        tracing::debug!(user_id, cleared, "unread cleared");
        Ok(())
    }
}

impl<S> std::fmt::Debug for HubStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubStore")
            .field("hub", &self.hub)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        env::SeededEnv,
        storage::{ChaoticStorage, MemoryStorage},
    };

    fn store() -> HubStore<MemoryStorage> {
        HubStore::new(MemoryStorage::new(), StoreConfig::default())
    }

    #[tokio::test]
    async fn save_then_get_latest() {
        let env = SeededEnv::with_seed(1);
        let store = store();
        let ctx = Context::background();
        let msg = Message::new(&env, "room1", "alice", "hi");

        store.save_message(&ctx, "room1", &msg, 10).await.unwrap();

        assert_eq!(store.get_messages(&ctx, "room1", 1).await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let env = SeededEnv::with_seed(2);
        let store = store();
        let ctx = Context::background();
        let msg = Message::new(&env, "room1", "a", "x");
        store.save_message(&ctx, "room1", &msg, 10).await.unwrap();

        assert!(store.get_messages(&ctx, "room1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_write_has_no_effect() {
        let env = SeededEnv::with_seed(3);
        let store = store();
        let ctx = Context::background();
        ctx.cancel();

        let msg = Message::new(&env, "room1", "alice", "hi");
        let result = store.save_message(&ctx, "room1", &msg, 10).await;

        assert_eq!(result, Err(StoreError::Cancelled));
        let live = Context::background();
        assert!(store.get_messages(&live, "room1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_read_reports_deadline() {
        let store = store();
        let ctx = Context::with_timeout(Duration::ZERO);

        let result = store.get_unread_messages(&ctx, "alice").await;
        assert_eq!(result, Err(StoreError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced() {
        let store = HubStore::new(
            ChaoticStorage::with_seed(MemoryStorage::new(), 1.0, 7),
            StoreConfig::default(),
        );
        let ctx = Context::background();

        let result = store.get_messages(&ctx, "room1", 5).await;
        assert!(matches!(result, Err(StoreError::Storage(StorageError::Io(_)))));
    }

    #[tokio::test]
    async fn join_backfills_oldest_first() {
        let env = SeededEnv::with_seed(4);
        let config = StoreConfig { history_limit: 2, ..StoreConfig::default() };
        let store = HubStore::new(MemoryStorage::new(), config);
        let ctx = Context::background();

        let msgs: Vec<_> =
            (0..3).map(|i| Message::new(&env, "room1", "alice", format!("m{i}"))).collect();
        for msg in &msgs {
            store.save_message(&ctx, "room1", msg, 10).await.unwrap();
        }

        let (sub, history) = store.join(&ctx, "room1", "bob").await.unwrap();

        assert_eq!(history, vec![msgs[1].clone(), msgs[2].clone()]);
        assert_eq!(sub.room_id(), "room1");
        assert_eq!(store.hub().room_subscriber_count("room1"), 1);
    }

    #[tokio::test]
    async fn route_room_message_saves_and_publishes() {
        let env = SeededEnv::with_seed(5);
        let store = store();
        let ctx = Context::background();
        let (mut sub, _) = store.join(&ctx, "room1", "bob").await.unwrap();

        let msg = Message::new(&env, "room1", "alice", "hello");
        let delivery = store.route_message(&ctx, &msg).await.unwrap();

        assert!(matches!(delivery, Delivery::Room { seq: 0, fan_out } if fan_out.delivered == 1));
        assert_eq!(sub.try_recv(), Some(msg.clone()));
        assert_eq!(store.get_messages(&ctx, "room1", 10).await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn route_direct_to_offline_user_stores_unread() {
        let env = SeededEnv::with_seed(6);
        let store = store();
        let ctx = Context::background();

        let msg = Message::new(&env, "room1", "alice", "psst").with_target("bob");
        let delivery = store.route_message(&ctx, &msg).await.unwrap();

        assert!(matches!(delivery, Delivery::Direct { stored_unread: true, .. }));
        assert_eq!(store.get_unread_messages(&ctx, "bob").await.unwrap(), vec![msg]);
        assert!(store.get_messages(&ctx, "room1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn route_direct_to_online_user_skips_unread() {
        let env = SeededEnv::with_seed(7);
        let store = store();
        let ctx = Context::background();
        let (mut sub, _) = store.join(&ctx, "room2", "bob").await.unwrap();

        let msg = Message::new(&env, "room1", "alice", "psst").with_target("bob");
        let delivery = store.route_message(&ctx, &msg).await.unwrap();

        assert!(matches!(delivery, Delivery::Direct { stored_unread: false, .. }));
        assert_eq!(sub.try_recv(), Some(msg));
        assert!(store.get_unread_messages(&ctx, "bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn take_unread_drains() {
        let env = SeededEnv::with_seed(8);
        let store = store();
        let ctx = Context::background();
        let msg = Message::new(&env, "room1", "alice", "hi");
        store.save_unread(&ctx, "bob", &msg).await.unwrap();

        assert_eq!(store.take_unread(&ctx, "bob").await.unwrap(), vec![msg]);
        assert!(store.get_unread_messages(&ctx, "bob").await.unwrap().is_empty());
    }
}
