//! Subscriber registry and publish fan-out.
//!
//! The hub maintains two indexes over live subscriptions: room → subscribers
//! (for room broadcast) and user → subscribers (for direct messages). Each
//! room and each user has its own lock; the outer maps are only locked to
//! find, create or remove an entry.
//!
//! Publishing snapshots a room's subscribers, then hands the message to each
//! subscriber's bounded mailbox without blocking. A full mailbox is handled
//! by the configured [`OverflowPolicy`], so one stalled reader never delays
//! the others or the publisher.

mod mailbox;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use mailbox::{Mailbox, Offer};
pub use mailbox::Subscription;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::StoreError, message::Message};

/// What happens when a subscriber's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room
    #[default]
    DropOldest,
    /// Close the subscription; the reader sees the end of the stream
    Disconnect,
}

/// Registry identifier of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers in the snapshot
    pub targeted: usize,
    /// Mailboxes that accepted the message
    pub delivered: usize,
    /// Deliveries that evicted an older queued message
    pub displaced: usize,
    /// Subscribers closed because their mailbox overflowed
    pub disconnected: usize,
    /// The context ended before every subscriber was reached
    pub aborted: bool,
}

type Slots = Arc<RwLock<HashMap<SubscriberId, Weak<Mailbox>>>>;
type Index = RwLock<HashMap<String, Slots>>;

/// Live subscriber registry with non-blocking fan-out.
pub struct Hub {
    rooms: Index,
    users: Index,
    next_id: AtomicU64,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Hub {
    /// Create a hub whose mailboxes hold `capacity` messages.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            policy,
        })
    }

    /// Register a subscriber for `room_id` on behalf of `user_id`.
    ///
    /// Messages published after this returns are delivered to the
    /// subscription until it is dropped or unsubscribed.
    pub fn subscribe(
        self: &Arc<Self>,
        room_id: &str,
        user_id: &str,
    ) -> Result<Subscription, StoreError> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Arc::new(Mailbox::new(id, room_id, user_id, self.capacity));

        insert_slot(&self.rooms, room_id, &mailbox)?;
        if let Err(err) = insert_slot(&self.users, user_id, &mailbox) {
            remove_slot(&self.rooms, room_id, id);
            return Err(err);
        }

        tracing::debug!(%id, room_id, user_id, "subscriber registered");
        Ok(Subscription::new(mailbox, Arc::downgrade(self)))
    }

    /// Close and unregister a subscription.
    ///
    /// Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub(crate) fn unregister(&self, mailbox: &Mailbox) {
        remove_slot(&self.rooms, &mailbox.room_id, mailbox.id);
        remove_slot(&self.users, &mailbox.user_id, mailbox.id);
        tracing::debug!(id = %mailbox.id, room_id = %mailbox.room_id, "subscriber unregistered");
    }

    /// Deliver `message` to every subscriber of `room_id`.
    ///
    /// Fails only if the context is already done or the registry is
    /// unavailable. Cancellation during fan-out stops the remaining
    /// hand-offs and is reported through [`FanOut::aborted`].
    pub fn publish(
        &self,
        ctx: &Context,
        room_id: &str,
        message: &Message,
    ) -> Result<FanOut, StoreError> {
        ctx.check()?;
        let targets = snapshot(&self.rooms, room_id)?;
        Ok(self.deliver(ctx, targets, message))
    }

    /// Deliver `message` to every subscription owned by `user_id`, in any
    /// room.
    pub fn publish_to_user(
        &self,
        ctx: &Context,
        user_id: &str,
        message: &Message,
    ) -> Result<FanOut, StoreError> {
        ctx.check()?;
        let targets = snapshot(&self.users, user_id)?;
        Ok(self.deliver(ctx, targets, message))
    }

    fn deliver(&self, ctx: &Context, targets: Vec<Arc<Mailbox>>, message: &Message) -> FanOut {
        let mut report = FanOut { targeted: targets.len(), ..FanOut::default() };

        for mailbox in targets {
            if ctx.is_done() {
                report.aborted = true;
                break;
            }

            match mailbox.offer(message.clone(), self.policy) {
                Offer::Queued => report.delivered += 1,
                Offer::Displaced => {
                    report.delivered += 1;
                    report.displaced += 1;
                },
                Offer::Overflowed => {
                    report.disconnected += 1;
                    tracing::warn!(
                        id = %mailbox.id,
                        room_id = %mailbox.room_id,
                        user_id = %mailbox.user_id,
                        "subscriber mailbox full, disconnecting"
                    );
                    self.unregister(&mailbox);
                },
                Offer::Closed => self.unregister(&mailbox),
            }
        }

        report
    }

    /// Number of live subscribers in a room.
    pub fn room_subscriber_count(&self, room_id: &str) -> usize {
        count(&self.rooms, room_id)
    }

    /// Number of live subscriptions owned by a user.
    pub fn user_subscriber_count(&self, user_id: &str) -> usize {
        count(&self.users, user_id)
    }

    /// Rooms with at least one subscriber.
    pub fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().map(|rooms| rooms.keys().cloned().collect()).unwrap_or_default()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> StoreError {
    StoreError::Registry("subscriber registry lock poisoned".into())
}

fn insert_slot(index: &Index, key: &str, mailbox: &Arc<Mailbox>) -> Result<(), StoreError> {
    // Insert while holding the outer lock (read or write) so remove_slot,
    // which needs the outer write lock, cannot drop the entry in between.
    {
        let map = index.read().map_err(|_| poisoned())?;
        if let Some(slots) = map.get(key) {
            slots.write().map_err(|_| poisoned())?.insert(mailbox.id, Arc::downgrade(mailbox));
            return Ok(());
        }
    }

    let mut map = index.write().map_err(|_| poisoned())?;
    let slots = map.entry(key.to_owned()).or_default();
    slots.write().map_err(|_| poisoned())?.insert(mailbox.id, Arc::downgrade(mailbox));
    Ok(())
}

fn remove_slot(index: &Index, key: &str, id: SubscriberId) {
    let Ok(mut map) = index.write() else {
        return;
    };
    let Some(slots) = map.get(key) else {
        return;
    };

    let now_empty = match slots.write() {
        Ok(mut slots) => {
            slots.remove(&id);
            slots.is_empty()
        },
        Err(_) => false,
    };
    if now_empty {
        map.remove(key);
    }
}

/// Live mailboxes registered under `key` right now.
fn snapshot(index: &Index, key: &str) -> Result<Vec<Arc<Mailbox>>, StoreError> {
    let slots = {
        let map = index.read().map_err(|_| poisoned())?;
        match map.get(key) {
            Some(slots) => Arc::clone(slots),
            None => return Ok(Vec::new()),
        }
    };

    let slots = slots.read().map_err(|_| poisoned())?;
    Ok(slots.values().filter_map(Weak::upgrade).collect())
}

fn count(index: &Index, key: &str) -> usize {
    let Ok(map) = index.read() else {
        return 0;
    };
    let Some(slots) = map.get(key) else {
        return 0;
    };
    slots.read().map_or(0, |slots| slots.values().filter(|w| w.strong_count() > 0).count())
}
