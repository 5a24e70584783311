//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling.
//! Used for chaos testing to ensure the store surfaces storage failures as
//! errors and never leaves partial writes behind.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use super::{Storage, StorageError};
use crate::message::Message;

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// based on a configured failure rate. A failed operation never reaches the
/// inner storage, so it has no effect.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<AtomicUsize>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos tests are reproducible with the
/// same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let fail = self
            .rng
            .lock()
            .map_err(|_| StorageError::Poisoned("chaos rng"))?
            .should_fail(self.failure_rate);

        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn append_message(
        &self,
        room_id: &str,
        message: &Message,
        retention: usize,
    ) -> Result<u64, StorageError> {
        self.inject()?;
        self.inner.append_message(room_id, message, retention)
    }

    fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        self.inject()?;
        self.inner.recent_messages(room_id, limit)
    }

    fn message_count(&self, room_id: &str) -> Result<usize, StorageError> {
        self.inject()?;
        self.inner.message_count(room_id)
    }

    fn list_rooms(&self) -> Result<Vec<String>, StorageError> {
        self.inject()?;
        self.inner.list_rooms()
    }

    fn add_unread(&self, user_id: &str, message: &Message) -> Result<bool, StorageError> {
        self.inject()?;
        self.inner.add_unread(user_id, message)
    }

    fn unread_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        self.inject()?;
        self.inner.unread_messages(user_id)
    }

    fn clear_unread(&self, user_id: &str) -> Result<usize, StorageError> {
        self.inject()?;
        self.inner.clear_unread(user_id)
    }

    fn take_unread(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        self.inject()?;
        self.inner.take_unread(user_id)
    }
}
