use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
};

use tokio::sync::Notify;

use super::{Hub, OverflowPolicy, SubscriberId};
use crate::message::Message;

/// Result of handing a message to a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Queued with room to spare
    Queued,
    /// Queued after evicting the oldest pending message
    Displaced,
    /// Mailbox was full under `Disconnect`; it is now closed
    Overflowed,
    /// Mailbox was already closed
    Closed,
}

struct MailboxState {
    queue: VecDeque<Message>,
    closed: bool,
    /// Messages evicted by `DropOldest`
    displaced: u64,
}

/// Bounded single-consumer queue between the hub and one subscriber.
pub(crate) struct Mailbox {
    pub(crate) id: SubscriberId,
    pub(crate) room_id: String,
    pub(crate) user_id: String,
    capacity: usize,
    state: Mutex<MailboxState>,
    ready: Notify,
}

impl Mailbox {
    pub(crate) fn new(id: SubscriberId, room_id: &str, user_id: &str, capacity: usize) -> Self {
        Self {
            id,
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            capacity: capacity.max(1),
            state: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                displaced: 0,
            }),
            ready: Notify::new(),
        }
    }

    /// Non-blocking hand-off.
    pub(crate) fn offer(&self, message: Message, policy: OverflowPolicy) -> Offer {
        let outcome = {
            let Ok(mut state) = self.state.lock() else {
                return Offer::Closed;
            };
            if state.closed {
                return Offer::Closed;
            }

            if state.queue.len() < self.capacity {
                state.queue.push_back(message);
                Offer::Queued
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        state.queue.pop_front();
                        state.queue.push_back(message);
                        state.displaced += 1;
                        Offer::Displaced
                    },
                    OverflowPolicy::Disconnect => {
                        state.closed = true;
                        Offer::Overflowed
                    },
                }
            }
        };

        self.ready.notify_one();
        outcome
    }

    pub(crate) fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.ready.notify_one();
    }

    fn pop(&self) -> Pop {
        let Ok(mut state) = self.state.lock() else {
            return Pop::Closed;
        };
        match state.queue.pop_front() {
            Some(message) => Pop::Message(message),
            None if state.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().map_or(true, |state| state.closed)
    }

    fn displaced(&self) -> u64 {
        self.state.lock().map_or(0, |state| state.displaced)
    }

    fn pending(&self) -> usize {
        self.state.lock().map_or(0, |state| state.queue.len())
    }
}

enum Pop {
    Message(Message),
    Empty,
    Closed,
}

/// Receiving end of a room subscription.
///
/// Owned by the connection layer. The hub only holds a weak reference:
/// dropping the subscription unregisters it, and a publish racing with the
/// drop simply skips it.
pub struct Subscription {
    mailbox: Arc<Mailbox>,
    hub: Weak<Hub>,
}

impl Subscription {
    pub(crate) fn new(mailbox: Arc<Mailbox>, hub: Weak<Hub>) -> Self {
        Self { mailbox, hub }
    }

    /// Registry id of this subscription.
    pub fn id(&self) -> SubscriberId {
        self.mailbox.id
    }

    /// Room this subscription receives messages for.
    pub fn room_id(&self) -> &str {
        &self.mailbox.room_id
    }

    /// User owning this subscription.
    pub fn user_id(&self) -> &str {
        &self.mailbox.user_id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the subscription is closed (unsubscribed, or
    /// disconnected on overflow) and every queued message has been received.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.mailbox.pop() {
                Pop::Message(message) => return Some(message),
                Pop::Closed => return None,
                // A notify_one issued between pop and here leaves a permit,
                // so this cannot miss a wakeup.
                Pop::Empty => self.mailbox.ready.notified().await,
            }
        }
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        match self.mailbox.pop() {
            Pop::Message(message) => Some(message),
            Pop::Empty | Pop::Closed => None,
        }
    }

    /// Whether the hub closed this subscription.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Messages evicted from this mailbox because it was full.
    pub fn displaced(&self) -> u64 {
        self.mailbox.displaced()
    }

    /// Messages waiting to be received.
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.mailbox.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(&self.mailbox);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.mailbox.id)
            .field("room_id", &self.mailbox.room_id)
            .field("user_id", &self.mailbox.user_id)
            .finish_non_exhaustive()
    }
}
