//! Environment abstraction for deterministic testing.
//!
//! Decouples the session state machine from system resources (the
//! retransmission timer, the session counter's random seed, the
//! wall-clock timestamp used to name configuration backup files).
//! Production uses real time and OS randomness; tests use a fake
//! clock so timeout behavior is reproducible without sleeping for
//! real.

use std::time::Duration;

/// Abstract environment providing time and randomness to session logic.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production.
/// - `wall_clock_secs()` is non-decreasing.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Sleep for the given duration. The only async method in the
    /// trait; used solely by the session's retransmission timer.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// Given the same seed, a test environment produces the same
    /// sequence; the production environment draws from a process-wide
    /// CSPRNG.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Draw a random `u16`, used to seed a session's counter.
    fn random_u16(&self) -> u16 {
        let mut bytes = [0u8; 2];
        self.random_bytes(&mut bytes);
        u16::from_be_bytes(bytes)
    }

    /// Current wall-clock time in seconds since the Unix epoch, used
    /// to name legacy-configuration backup files.
    fn wall_clock_secs(&self) -> u64;
}
