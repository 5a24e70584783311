//! Environment abstraction for message stamping.
//!
//! Decouples message construction from system resources (clocks,
//! randomness). Production code uses [`SystemEnv`]; tests use a seeded
//! environment so message ids and timestamps are reproducible.

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Wall clock time in milliseconds since the Unix epoch.
    ///
    /// Used for message timestamps. Not monotonic.
    fn wall_clock_millis(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u128`.
    ///
    /// Used for message identities.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

/// Production environment using system time and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Message ids must be unique, and without
/// working entropy the store cannot guarantee that.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock_millis(&self) -> u64 {
        // A clock set before 1970 stamps messages at the epoch.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - message ids would collide");
    }
}

/// Deterministic environment for tests.
///
/// Seeded ChaCha RNG for ids and a manually advanced wall clock, so the same
/// seed always produces the same messages.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Clone)]
pub struct SeededEnv {
    rng: std::sync::Arc<std::sync::Mutex<rand_chacha::ChaCha8Rng>>,
    clock_ms: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(any(test, feature = "test-utils"))]
impl SeededEnv {
    /// Create an environment from a seed, with the wall clock at
    /// 2024-01-01T00:00:00Z.
    pub fn with_seed(seed: u64) -> Self {
        use rand::SeedableRng;

        Self {
            rng: std::sync::Arc::new(std::sync::Mutex::new(
                rand_chacha::ChaCha8Rng::seed_from_u64(seed),
            )),
            clock_ms: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1_704_067_200_000)),
        }
    }

    /// Advance the wall clock.
    pub fn advance_millis(&self, millis: u64) {
        self.clock_ms.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Environment for SeededEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.clock_ms.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;

        self.rng.lock().expect("SeededEnv rng mutex poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_random_ids_differ() {
        let env = SystemEnv::new();
        assert_ne!(env.random_u128(), env.random_u128());
    }

    #[test]
    fn system_env_wall_clock_is_after_2020() {
        let env = SystemEnv::new();
        assert!(env.wall_clock_millis() > 1_577_836_800_000);
    }

    #[test]
    fn seeded_env_is_reproducible() {
        let a = SeededEnv::with_seed(7);
        let b = SeededEnv::with_seed(7);

        assert_eq!(a.random_u128(), b.random_u128());
        assert_eq!(a.random_u128(), b.random_u128());
    }

    #[test]
    fn seeded_env_clock_advances() {
        let env = SeededEnv::with_seed(1);
        let before = env.wall_clock_millis();
        env.advance_millis(250);
        assert_eq!(env.wall_clock_millis(), before + 250);
    }
}
