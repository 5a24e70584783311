//! In-memory storage backend.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, RwLock},
};

use super::{Storage, StorageError};
use crate::message::{Message, MessageId};

/// In-memory storage implementation for tests and single-process use
///
/// Locking is per room and per user: the outer maps are only locked long
/// enough to find or insert an entry, then the entry's own mutex serializes
/// operations on that room or user. Operations on different rooms or users
/// never wait on each other.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    rooms: Arc<RwLock<HashMap<String, Arc<Mutex<RoomLog>>>>>,
    unread: Arc<RwLock<HashMap<String, Arc<Mutex<UnreadSet>>>>>,
}

#[derive(Default)]
struct RoomLog {
    /// Sequence number for the next appended message
    next_seq: u64,
    /// Retained messages, oldest at the front
    messages: VecDeque<Message>,
}

#[derive(Default)]
struct UnreadSet {
    /// Unread messages in the order they became unread
    order: Vec<Message>,
    /// Ids present in `order`
    ids: HashSet<MessageId>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room_id: &str) -> Result<Option<Arc<Mutex<RoomLog>>>, StorageError> {
        let rooms = self.rooms.read().map_err(|_| StorageError::Poisoned("room index"))?;
        Ok(rooms.get(room_id).cloned())
    }

    fn room_or_create(&self, room_id: &str) -> Result<Arc<Mutex<RoomLog>>, StorageError> {
        if let Some(room) = self.room(room_id)? {
            return Ok(room);
        }

        let mut rooms = self.rooms.write().map_err(|_| StorageError::Poisoned("room index"))?;
        Ok(Arc::clone(rooms.entry(room_id.to_owned()).or_default()))
    }

    fn unread_set(&self, user_id: &str) -> Result<Option<Arc<Mutex<UnreadSet>>>, StorageError> {
        let unread = self.unread.read().map_err(|_| StorageError::Poisoned("unread index"))?;
        Ok(unread.get(user_id).cloned())
    }

    fn unread_set_or_create(&self, user_id: &str) -> Result<Arc<Mutex<UnreadSet>>, StorageError> {
        if let Some(set) = self.unread_set(user_id)? {
            return Ok(set);
        }

        let mut unread = self.unread.write().map_err(|_| StorageError::Poisoned("unread index"))?;
        Ok(Arc::clone(unread.entry(user_id.to_owned()).or_default()))
    }
}

impl Storage for MemoryStorage {
    fn append_message(
        &self,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<u64, StorageError> {
        let room = self.room_or_create(room_id)?;
        let mut log = room.lock().map_err(|_| StorageError::Poisoned("room log"))?;

        let seq = log.next_seq;
        log.next_seq += 1;
        log.messages.push_back(message.clone());

        let retention = retention.max(1);
        while log.messages.len() > retention {
            log.messages.pop_front();
        }

        debug_assert!(log.messages.len() <= retention);
        Ok(seq)
    }

    fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        let Some(room) = self.room(room_id)? else {
            return Ok(Vec::new());
        };
        let log = room.lock().map_err(|_| StorageError::Poisoned("room log"))?;

        Ok(log.messages.iter().rev().take(limit).cloned().collect())
    }

    fn message_count(&self, room_id: &str) -> Result<usize, StorageError> {
        let Some(room) = self.room(room_id)? else {
            return Ok(0);
        };
        let log = room.lock().map_err(|_| StorageError::Poisoned("room log"))?;
        Ok(log.messages.len())
    }

    fn list_rooms(&self) -> Result<Vec<String>, StorageError> {
        let rooms = self.rooms.read().map_err(|_| StorageError::Poisoned("room index"))?;
        Ok(rooms.keys().cloned().collect())
    }

    fn add_unread(&self, user_id: &str, message: &Message) -> Result<bool, StorageError> {
        let set = self.unread_set_or_create(user_id)?;
        let mut set = set.lock().map_err(|_| StorageError::Poisoned("unread set"))?;

        if !set.ids.insert(message.id) {
            return Ok(false);
        }
        set.order.push(message.clone());
        Ok(true)
    }

    fn unread_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        let Some(set) = self.unread_set(user_id)? else {
            return Ok(Vec::new());
        };
        let set = set.lock().map_err(|_| StorageError::Poisoned("unread set"))?;
        Ok(set.order.clone())
    }

    fn clear_unread(&self, user_id: &str) -> Result<usize, StorageError> {
        Ok(self.take_unread(user_id)?.len())
    }

    fn take_unread(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        // The entry stays in the index: a concurrent add_unread may already
        // hold this set's Arc and must not land in a detached copy.
        let Some(set) = self.unread_set(user_id)? else {
            return Ok(Vec::new());
        };
        let mut set = set.lock().map_err(|_| StorageError::Poisoned("unread set"))?;

        set.ids.clear();
        Ok(std::mem::take(&mut set.order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SeededEnv;

    fn messages(env: &SeededEnv, room_id: &str, count: usize) -> Vec<Message> {
        (0..count).map(|i| Message::new(env, room_id, "alice", format!("msg {i}"))).collect()
    }

    #[test]
    fn unknown_room_is_empty() {
        let storage = MemoryStorage::new();
        assert!(storage.recent_messages("nowhere", 10).unwrap().is_empty());
        assert_eq!(storage.message_count("nowhere").unwrap(), 0);
    }

    #[test]
    fn recent_messages_are_newest_first() {
        let env = SeededEnv::with_seed(1);
        let storage = MemoryStorage::new();
        let msgs = messages(&env, "room1", 3);

        for msg in &msgs {
            storage.append_message("room1", msg, 10).unwrap();
        }

        let recent = storage.recent_messages("room1", 10).unwrap();
        assert_eq!(recent, vec![msgs[2].clone(), msgs[1].clone(), msgs[0].clone()]);
    }

    #[test]
    fn sequence_numbers_increase_per_room() {
        let env = SeededEnv::with_seed(2);
        let storage = MemoryStorage::new();

        for (expected, msg) in messages(&env, "a", 3).iter().enumerate() {
            assert_eq!(storage.append_message("a", msg, 10).unwrap(), expected as u64);
        }

        // Independent counter per room
        let other = Message::new(&env, "b", "bob", "hi");
        assert_eq!(storage.append_message("b", &other, 10).unwrap(), 0);
    }

    #[test]
    fn retention_evicts_oldest() {
        let env = SeededEnv::with_seed(3);
        let storage = MemoryStorage::new();
        let msgs = messages(&env, "room1", 5);

        for msg in &msgs {
            storage.append_message("room1", msg, 3).unwrap();
        }

        assert_eq!(storage.message_count("room1").unwrap(), 3);
        let recent = storage.recent_messages("room1", 10).unwrap();
        assert_eq!(recent.first(), Some(&msgs[4]));
        assert_eq!(recent.last(), Some(&msgs[2]));
    }

    #[test]
    fn zero_retention_keeps_latest_message() {
        let env = SeededEnv::with_seed(4);
        let storage = MemoryStorage::new();
        let msgs = messages(&env, "room1", 2);

        storage.append_message("room1", &msgs[0], 0).unwrap();
        storage.append_message("room1", &msgs[1], 0).unwrap();

        assert_eq!(storage.recent_messages("room1", 5).unwrap(), vec![msgs[1].clone()]);
    }

    #[test]
    fn limit_zero_returns_nothing() {
        let env = SeededEnv::with_seed(5);
        let storage = MemoryStorage::new();
        storage.append_message("room1", &Message::new(&env, "room1", "a", "x"), 10).unwrap();

        assert!(storage.recent_messages("room1", 0).unwrap().is_empty());
    }

    #[test]
    fn add_unread_is_idempotent_by_id() {
        let env = SeededEnv::with_seed(6);
        let storage = MemoryStorage::new();
        let msg = Message::new(&env, "room1", "alice", "hi");

        assert!(storage.add_unread("bob", &msg).unwrap());
        assert!(!storage.add_unread("bob", &msg).unwrap());

        assert_eq!(storage.unread_messages("bob").unwrap(), vec![msg]);
    }

    #[test]
    fn unread_is_oldest_first() {
        let env = SeededEnv::with_seed(7);
        let storage = MemoryStorage::new();
        let msgs = messages(&env, "room1", 3);

        for msg in &msgs {
            storage.add_unread("bob", msg).unwrap();
        }

        assert_eq!(storage.unread_messages("bob").unwrap(), msgs);
    }

    #[test]
    fn clear_unread_empties_and_allows_readding() {
        let env = SeededEnv::with_seed(8);
        let storage = MemoryStorage::new();
        let msg = Message::new(&env, "room1", "alice", "hi");

        storage.add_unread("bob", &msg).unwrap();
        assert_eq!(storage.clear_unread("bob").unwrap(), 1);
        assert!(storage.unread_messages("bob").unwrap().is_empty());

        // Cleared ids may become unread again
        assert!(storage.add_unread("bob", &msg).unwrap());
    }

    #[test]
    fn clear_unread_for_unknown_user_is_noop() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.clear_unread("ghost").unwrap(), 0);
    }

    #[test]
    fn take_unread_returns_and_clears() {
        let env = SeededEnv::with_seed(9);
        let storage = MemoryStorage::new();
        let msgs = messages(&env, "room1", 2);

        for msg in &msgs {
            storage.add_unread("bob", msg).unwrap();
        }

        assert_eq!(storage.take_unread("bob").unwrap(), msgs);
        assert!(storage.unread_messages("bob").unwrap().is_empty());
    }

    #[test]
    fn list_rooms_reports_every_room() {
        let env = SeededEnv::with_seed(10);
        let storage = MemoryStorage::new();

        for room in ["a", "b", "c"] {
            storage.append_message(room, &Message::new(&env, room, "x", "y"), 5).unwrap();
        }

        let mut rooms = storage.list_rooms().unwrap();
        rooms.sort_unstable();
        assert_eq!(rooms, vec!["a", "b", "c"]);
    }
}
