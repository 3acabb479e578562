//! Wall-clock anchored to the monotonic tick counter
//!
//! A successful time sync records an [`Anchor`]: the Unix time and the tick
//! at which it was obtained. Wall-clock time at any other tick is derived
//! from the anchor, which is also how backlogged records recover their
//! timestamps.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::calendar::{DateTime, IsoTimestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Anchor {
    /// UTC seconds since the Unix epoch at `tick_ms`
    pub unix_secs: u64,
    pub tick_ms: u64,
}

impl Anchor {
    /// UTC seconds at `tick_ms`, flooring partial seconds. Ticks before the
    /// anchor give earlier times.
    pub fn unix_at(&self, tick_ms: u64) -> i64 {
        let elapsed_ms = tick_ms as i64 - self.tick_ms as i64;
        self.unix_secs as i64 + elapsed_ms.div_euclid(1000)
    }
}

pub struct WallClock<M: RawMutex> {
    anchor: Mutex<M, Cell<Option<Anchor>>>,
    utc_offset_secs: i32,
}

impl<M: RawMutex> WallClock<M> {
    pub const fn new(utc_offset_secs: i32) -> Self {
        Self {
            anchor: Mutex::new(Cell::new(None)),
            utc_offset_secs,
        }
    }

    /// Replace the anchor with a fresh reading
    pub fn calibrate(&self, unix_secs: u64, tick_ms: u64) {
        self.anchor
            .lock(|cell| cell.set(Some(Anchor { unix_secs, tick_ms })));
        debug!("Wall-clock calibrated: {} s at tick {} ms", unix_secs, tick_ms);
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor.lock(|cell| cell.get())
    }

    /// Local timestamp at `tick_ms`, or `None` before the first sync
    pub fn timestamp_at(&self, tick_ms: u64) -> Option<IsoTimestamp> {
        let anchor = self.anchor()?;
        let local = anchor.unix_at(tick_ms) + i64::from(self.utc_offset_secs);
        Some(DateTime::from_unix(local).to_iso())
    }
}
