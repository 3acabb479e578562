//! Wall-clock time: calendar math, tick-anchored clock and the sync loop

pub mod calendar;
pub mod clock;
pub mod sync;

pub use calendar::{DateTime, IsoTimestamp};
pub use clock::{Anchor, WallClock};
pub use sync::{SyncError, TimeSync};
