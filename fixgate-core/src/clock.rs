/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Time source abstraction.
//!
//! The framer stamps connection uuids, error events, and persisted records
//! from an [`EpochNanoClock`]. Timer deadlines use `std::time::Instant`
//! directly; this trait only covers wall-clock stamps so tests can pin them.

use crate::types::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of epoch-nanosecond wall-clock time.
pub trait EpochNanoClock: Send + Sync + Debug {
    /// Returns nanoseconds since the Unix epoch.
    fn nanos(&self) -> u64;

    /// Returns the current time as a [`Timestamp`].
    fn timestamp(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos())
    }
}

/// System clock, the production time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNanoClock;

impl EpochNanoClock for SystemNanoClock {
    fn nanos(&self) -> u64 {
        Timestamp::now().as_nanos()
    }
}

/// Manually-advanced clock for tests.
#[derive(Debug, Default, Clone)]
pub struct ManualNanoClock {
    nanos: Arc<AtomicU64>,
}

impl ManualNanoClock {
    /// Creates a clock pinned at the given epoch-nanosecond value.
    #[must_use]
    pub fn new(nanos: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(nanos)),
        }
    }

    /// Advances the clock by the given number of nanoseconds.
    pub fn advance(&self, delta_nanos: u64) {
        self.nanos.fetch_add(delta_nanos, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute epoch-nanosecond value.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl EpochNanoClock for ManualNanoClock {
    fn nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemNanoClock;
        let a = clock.nanos();
        let b = clock.nanos();
        assert!(b >= a);
        assert!(a > 1_577_836_800_000_000_000); // after 2020
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualNanoClock::new(1_000);
        assert_eq!(clock.nanos(), 1_000);

        clock.advance(500);
        assert_eq!(clock.nanos(), 1_500);

        clock.set(10);
        assert_eq!(clock.timestamp().as_nanos(), 10);
    }
}
