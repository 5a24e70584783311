//! Chat message store.
//!
//! Per-room publish/subscribe delivery, durable message history with bounded
//! retention, and per-user unread tracking.
//!
//! # Architecture
//!
//! The connection layer talks to a [`ChatStore`]. The production
//! implementation, [`HubStore`], splits the work in two:
//!
//! - [`Hub`]: in-memory registry of live subscriptions. Publishing snapshots
//!   a room's subscribers and hands the message to each bounded mailbox
//!   without blocking.
//! - [`Storage`]: synchronous persistence for room logs and unread sets.
//!   [`MemoryStorage`] for tests and single-process use, [`RedbStorage`] for
//!   durability, [`ChaoticStorage`] for fault injection.
//!
//! Every operation takes a [`Context`] carrying cancellation and an optional
//! deadline.
//!
//! # Components
//!
//! - [`HubStore`]: `ChatStore` over a hub and a storage backend
//! - [`Subscription`]: receiving end of a room subscription
//! - [`StoreConfig`]: TOML configuration
//! - [`Environment`]: clock and randomness used to stamp messages

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod env;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod hub;
pub mod message;
pub mod storage;
pub mod store;

pub use config::{BackendConfig, ConfigError, StoreConfig};
pub use context::Context;
#[cfg(any(test, feature = "test-utils"))]
pub use env::SeededEnv;
pub use env::{Environment, SystemEnv};
pub use error::StoreError;
#[cfg(any(test, feature = "test-utils"))]
pub use fake::RecordingStore;
pub use hub::{FanOut, Hub, OverflowPolicy, SubscriberId, Subscription};
pub use message::{Message, MessageId};
pub use storage::{Backend, ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use store::{ChatStore, Delivery, HubStore};
