//! Chat message value type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::env::Environment;

/// Stable identity of a message.
///
/// Unread tracking de-duplicates on this id, so two messages with the same
/// id are treated as the same message regardless of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u128);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A chat message.
///
/// Immutable once created: the store clones it into room logs, unread sets
/// and subscriber mailboxes but never modifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identity
    pub id: MessageId,
    /// Sender
    pub user: String,
    /// Message body
    pub content: String,
    /// When the message was created, in milliseconds since the Unix epoch
    pub sent_at_ms: u64,
    /// Room the message was sent in
    pub room_id: String,
    /// Recipient user for direct messages; `None` for room messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Message {
    /// Create a room message with a fresh id and the current wall clock time.
    pub fn new<E: Environment>(
        env: &E,
        room_id: impl Into<String>,
        user: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId(env.random_u128()),
            user: user.into(),
            content: content.into(),
            sent_at_ms: env.wall_clock_millis(),
            room_id: room_id.into(),
            target: None,
        }
    }

    /// Address this message to a single user.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Whether this is a direct message to one user.
    pub fn is_direct(&self) -> bool {
        self.target.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SeededEnv;

    #[test]
    fn message_id_displays_as_fixed_width_hex() {
        assert_eq!(MessageId(0xab).to_string(), format!("{:0>32}", "ab"));
    }

    #[test]
    fn new_message_is_stamped_by_env() {
        let env = SeededEnv::with_seed(3);
        let msg = Message::new(&env, "room1", "alice", "hi");

        assert_eq!(msg.room_id, "room1");
        assert_eq!(msg.user, "alice");
        assert_eq!(msg.sent_at_ms, env.wall_clock_millis());
        assert!(!msg.is_direct());
    }

    #[test]
    fn with_target_marks_direct() {
        let env = SeededEnv::with_seed(3);
        let msg = Message::new(&env, "room1", "alice", "psst").with_target("bob");

        assert!(msg.is_direct());
        assert_eq!(msg.target.as_deref(), Some("bob"));
    }

    #[test]
    fn cbor_roundtrip_preserves_missing_target() {
        let env = SeededEnv::with_seed(9);
        let msg = Message::new(&env, "room1", "alice", "hello");

        let mut bytes = Vec::new();
        ciborium::into_writer(&msg, &mut bytes).unwrap();
        let decoded: Message = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded, msg);
    }
}
