//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Every mutating call is a single write transaction, so retention trimming
//! and unread clearing are never observed half-applied.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::{Storage, StorageError};
use crate::message::Message;

/// Table: messages
/// Key: (room_id, seq)
/// Value: CBOR-encoded Message
const MESSAGES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("messages");

/// Table: rooms
/// Key: room_id
/// Value: next sequence number for the room
const ROOMS: TableDefinition<&str, u64> = TableDefinition::new("rooms");

/// Table: unread
/// Key: (user_id, seq)
/// Value: CBOR-encoded Message
const UNREAD: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("unread");

/// Table: unread_ids
/// Key: (user_id, message id)
/// Value: seq of the entry in UNREAD
const UNREAD_IDS: TableDefinition<(&str, u128), u64> = TableDefinition::new("unread_ids");

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode(message: &Message) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes)?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<Message, StorageError> {
    Ok(ciborium::from_reader(bytes)?)
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (MESSAGES, ROOMS, UNREAD,
    /// UNREAD_IDS).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(ROOMS).map_err(io)?;
            let _ = txn.open_table(UNREAD).map_err(io)?;
            let _ = txn.open_table(UNREAD_IDS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        tracing::debug!(path = %path.as_ref().display(), "opened redb storage");

        Ok(Self { db: Arc::new(db) })
    }

    /// Sequence numbers of a user's unread entries, oldest first.
    fn unread_seqs<T: ReadableTable<(&'static str, u64), &'static [u8]>>(
        table: &T,
        user_id: &str,
    ) -> Result<Vec<u64>, StorageError> {
        let mut seqs = Vec::new();
        for entry in table.range((user_id, 0)..=(user_id, u64::MAX)).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            seqs.push(key.value().1);
        }
        Ok(seqs)
    }
}

impl Storage for RedbStorage {
    fn append_message(
        &self,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<u64, StorageError> {
        let bytes = encode(message)?;
        let retention = retention.max(1);

        let txn = self.db.begin_write().map_err(io)?;
        let seq = {
            let mut rooms = txn.open_table(ROOMS).map_err(io)?;
            let seq = rooms.get(room_id).map_err(io)?.map_or(0, |next| next.value());
            rooms.insert(room_id, seq + 1).map_err(io)?;

            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            messages.insert((room_id, seq), bytes.as_slice()).map_err(io)?;

            // Keys are ordered by seq, so the range walks oldest first.
            let mut retained = Vec::new();
            for entry in messages.range((room_id, 0)..=(room_id, seq)).map_err(io)? {
                let (key, _) = entry.map_err(io)?;
                retained.push(key.value().1);
            }

            let excess = retained.len().saturating_sub(retention);
            for old_seq in &retained[..excess] {
                messages.remove((room_id, *old_seq)).map_err(io)?;
            }

            seq
        };
        txn.commit().map_err(io)?;

        Ok(seq)
    }

    fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let mut messages = Vec::new();
        for entry in table.range((room_id, 0)..=(room_id, u64::MAX)).map_err(io)?.rev() {
            if messages.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(io)?;
            messages.push(decode(value.value())?);
        }

        Ok(messages)
    }

    fn message_count(&self, room_id: &str) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let mut count = 0;
        for entry in table.range((room_id, 0)..=(room_id, u64::MAX)).map_err(io)? {
            entry.map_err(io)?;
            count += 1;
        }
        Ok(count)
    }

    fn list_rooms(&self) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(ROOMS).map_err(io)?;

        let mut rooms = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            rooms.push(key.value().to_owned());
        }
        Ok(rooms)
    }

    fn add_unread(&self, user_id: &str, message: &Message) -> Result<bool, StorageError> {
        let bytes = encode(message)?;

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut ids = txn.open_table(UNREAD_IDS).map_err(io)?;
            if ids.get((user_id, message.id.0)).map_err(io)?.is_some() {
                return Ok(false);
            }

            let mut unread = txn.open_table(UNREAD).map_err(io)?;
            let last = unread
                .range((user_id, 0)..=(user_id, u64::MAX))
                .map_err(io)?
                .next_back()
                .transpose()
                .map_err(io)?
                .map(|(key, _)| key.value().1);
            let seq = last.map_or(0, |last| last + 1);

            unread.insert((user_id, seq), bytes.as_slice()).map_err(io)?;
            ids.insert((user_id, message.id.0), seq).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(true)
    }

    fn unread_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(UNREAD).map_err(io)?;

        let mut messages = Vec::new();
        for entry in table.range((user_id, 0)..=(user_id, u64::MAX)).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            messages.push(decode(value.value())?);
        }
        Ok(messages)
    }

    fn clear_unread(&self, user_id: &str) -> Result<usize, StorageError> {
        Ok(self.take_unread(user_id)?.len())
    }

    fn take_unread(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let taken = {
            let mut unread = txn.open_table(UNREAD).map_err(io)?;
            let mut ids = txn.open_table(UNREAD_IDS).map_err(io)?;

            let mut taken = Vec::new();
            for seq in Self::unread_seqs(&unread, user_id)? {
                if let Some(value) = unread.remove((user_id, seq)).map_err(io)? {
                    taken.push(decode(value.value())?);
                }
            }
            for message in &taken {
                ids.remove((user_id, message.id.0)).map_err(io)?;
            }

            taken
        };

        if taken.is_empty() {
            txn.abort().map_err(io)?;
        } else {
            txn.commit().map_err(io)?;
        }

        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::env::SeededEnv;

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chat.redb")).unwrap();
        let env = SeededEnv::with_seed(1);

        let m1 = Message::new(&env, "room1", "alice", "one");
        let m2 = Message::new(&env, "room1", "bob", "two");
        assert_eq!(storage.append_message("room1", &m1, 10).unwrap(), 0);
        assert_eq!(storage.append_message("room1", &m2, 10).unwrap(), 1);

        assert_eq!(storage.recent_messages("room1", 10).unwrap(), vec![m2, m1]);
    }

    #[test]
    fn retention_trims_within_transaction() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chat.redb")).unwrap();
        let env = SeededEnv::with_seed(2);

        let msgs: Vec<_> =
            (0..6).map(|i| Message::new(&env, "room1", "alice", format!("m{i}"))).collect();
        for msg in &msgs {
            storage.append_message("room1", msg, 4).unwrap();
        }

        assert_eq!(storage.message_count("room1").unwrap(), 4);
        let recent = storage.recent_messages("room1", 2).unwrap();
        assert_eq!(recent, vec![msgs[5].clone(), msgs[4].clone()]);
    }

    #[test]
    fn rooms_do_not_bleed_into_each_other() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chat.redb")).unwrap();
        let env = SeededEnv::with_seed(3);

        // "room" is a prefix of "room1"; tuple keys keep them apart
        storage.append_message("room", &Message::new(&env, "room", "a", "x"), 10).unwrap();
        storage.append_message("room1", &Message::new(&env, "room1", "b", "y"), 10).unwrap();

        assert_eq!(storage.message_count("room").unwrap(), 1);
        assert_eq!(storage.message_count("room1").unwrap(), 1);
    }

    #[test]
    fn unread_dedupes_and_clears() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chat.redb")).unwrap();
        let env = SeededEnv::with_seed(4);
        let msg = Message::new(&env, "room1", "alice", "hi");

        assert!(storage.add_unread("bob", &msg).unwrap());
        assert!(!storage.add_unread("bob", &msg).unwrap());
        assert_eq!(storage.unread_messages("bob").unwrap(), vec![msg.clone()]);

        assert_eq!(storage.clear_unread("bob").unwrap(), 1);
        assert!(storage.unread_messages("bob").unwrap().is_empty());
        assert!(storage.add_unread("bob", &msg).unwrap());
    }

    #[test]
    fn unknown_room_and_user_are_empty() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chat.redb")).unwrap();

        assert!(storage.recent_messages("none", 5).unwrap().is_empty());
        assert!(storage.unread_messages("none").unwrap().is_empty());
        assert_eq!(storage.clear_unread("none").unwrap(), 0);
        assert!(storage.list_rooms().unwrap().is_empty());
    }
}
