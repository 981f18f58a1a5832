//! # Time-Bounded Nonce Cache
//!
//! Replay prevention for signed headers.
//!
//! ## Security Design
//!
//! - A signature is only accepted within `max_age` of its timestamp, so a
//!   `(key_id, nonce)` pair only needs to be remembered for `max_age`.
//! - Entries are garbage-collected once their window has passed, which
//!   bounds memory while still rejecting exact replays.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from nonce cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// The pair was already seen inside the window.
    #[error("Nonce {nonce} for key {key_id} has already been used (replay attack)")]
    NonceReused { key_id: String, nonce: String },
}

struct NonceState {
    /// (key_id, nonce) -> time after which the entry may be dropped.
    entries: HashMap<(String, String), DateTime<Utc>>,
    /// Last garbage collection.
    last_gc: Option<DateTime<Utc>>,
}

/// Thread-safe, time-bounded set of seen `(key_id, nonce)` pairs.
pub struct NonceCache {
    state: Mutex<NonceState>,
    /// How long a pair is remembered.
    max_age: Duration,
    /// Minimum spacing between periodic sweeps.
    gc_interval: Duration,
    /// Size that forces a sweep regardless of interval.
    max_entries: usize,
}

impl NonceCache {
    /// Default garbage collection interval (seconds).
    pub const DEFAULT_GC_INTERVAL: i64 = 10;

    /// Maximum entries before a forced sweep.
    pub const MAX_ENTRIES: usize = 100_000;

    /// Create a cache remembering pairs for `max_age`.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self::with_config(
            max_age,
            Duration::seconds(Self::DEFAULT_GC_INTERVAL),
            Self::MAX_ENTRIES,
        )
    }

    /// Create a cache with custom sweep settings.
    #[must_use]
    pub fn with_config(max_age: Duration, gc_interval: Duration, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(NonceState {
                entries: HashMap::new(),
                last_gc: None,
            }),
            max_age,
            gc_interval,
            max_entries,
        }
    }

    /// Record `(key_id, nonce)` as used at `signed_at`.
    ///
    /// # Errors
    ///
    /// `NonceError::NonceReused` if the pair is still inside its window.
    pub fn check_and_insert(
        &self,
        key_id: &str,
        nonce: &str,
        signed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NonceError> {
        let mut state = self.state.lock();

        let due = state
            .last_gc
            .map_or(true, |last| now - last > self.gc_interval);
        if due || state.entries.len() >= self.max_entries {
            state.entries.retain(|_, expires| *expires > now);
            state.last_gc = Some(now);
        }

        let key = (key_id.to_string(), nonce.to_string());
        if let Some(expires) = state.entries.get(&key) {
            if *expires > now {
                return Err(NonceError::NonceReused {
                    key_id: key_id.to_string(),
                    nonce: nonce.to_string(),
                });
            }
        }

        state.entries.insert(key, signed_at + self.max_age);
        Ok(())
    }

    /// Whether the pair is currently remembered.
    #[must_use]
    pub fn contains(&self, key_id: &str, nonce: &str) -> bool {
        self.state
            .lock()
            .entries
            .contains_key(&(key_id.to_string(), nonce.to_string()))
    }

    /// Number of remembered pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Window length.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}
