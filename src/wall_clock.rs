//! # Wall clock
//! The read-mostly calendar time shared between the clock service (writer) and the other services (readers).
//!
//! The clock service pushes the RTC time in on start-up and on every resync, readers extrapolate from the last sync
//! point with the monotonic `embassy_time` clock. The lock is a blocking critical-section mutex and is never held
//! across an await.

use core::cell::Cell;

use chrono::{NaiveDateTime, TimeDelta};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

/// Anything that can tell the current calendar time.
pub trait TimeSource {
    /// The current time, `None` if it is not known yet.
    fn now(&self) -> Option<NaiveDateTime>;
}

/// Calendar time anchored to the monotonic clock.
pub struct WallClock {
    /// RTC time at the last sync and the monotonic instant it was taken at
    anchor: Mutex<CriticalSectionRawMutex, Cell<Option<(NaiveDateTime, Instant)>>>,
}

impl WallClock {
    /// Create a wall clock that does not know the time yet.
    pub const fn new() -> Self {
        Self {
            anchor: Mutex::new(Cell::new(None)),
        }
    }

    /// Set the wall clock to `now`.
    pub fn sync(&self, now: NaiveDateTime) {
        self.anchor.lock(|anchor| anchor.set(Some((now, Instant::now()))));
    }

    /// The wall clock has been synced at least once.
    pub fn is_synced(&self) -> bool {
        self.anchor.lock(|anchor| anchor.get().is_some())
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Option<NaiveDateTime> {
        let (at_sync, instant) = self.anchor.lock(Cell::get)?;
        let elapsed = i64::try_from(instant.elapsed().as_millis()).ok()?;
        at_sync.checked_add_signed(TimeDelta::try_milliseconds(elapsed)?)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> Option<NaiveDateTime> {
        (**self).now()
    }
}
