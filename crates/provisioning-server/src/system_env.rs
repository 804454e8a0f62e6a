//! Production `Environment` implementation using system time and RNG.
//!
//! - OS cryptographic RNG (`getrandom`). Truly random, not reproducible.
//! - Tokio async sleep for real wall-clock delays.
//!
//! Production behavior is non-deterministic by design; tests use a
//! fake `Environment` instead (see `provisioning_core::session` and
//! `provisioning_core::config` test modules).

use std::time::Duration;

use provisioning_core::Environment;

/// Production environment using `tokio::time::sleep` and `getrandom`.
///
/// # Panics
///
/// [`Environment::random_bytes`] panics if the OS RNG fails. A server
/// without functioning cryptographic randomness cannot operate
/// securely, and RNG failure is otherwise unrecoverable.
#[derive(Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - server cannot operate securely");
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }
}
