//! Periodic wall-clock synchronization

use embassy_sync::blocking_mutex::raw::RawMutex;
use envnode_hal::{DelayNs, Monotonic, TimeSource};

use super::clock::WallClock;
use crate::state::ConnectivityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError<E> {
    /// Skipped because the link is down
    LinkDown,
    /// The time source failed; the previous anchor is kept
    Source(E),
}

impl<E: core::fmt::Debug> core::fmt::Display for SyncError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LinkDown => write!(f, "Link down, sync skipped"),
            Self::Source(e) => write!(f, "Time source failed: {:?}", e),
        }
    }
}

/// Keeps the wall clock anchored and owns the time-synchronized flag
pub struct TimeSync<'a, M: RawMutex, T, C> {
    source: T,
    clock: &'a WallClock<M>,
    mono: &'a C,
    state: &'a ConnectivityState,
    interval_ms: u32,
}

impl<'a, M, T, C> TimeSync<'a, M, T, C>
where
    M: RawMutex,
    T: TimeSource,
    C: Monotonic,
{
    pub fn new(
        source: T,
        clock: &'a WallClock<M>,
        mono: &'a C,
        state: &'a ConnectivityState,
        interval_ms: u32,
    ) -> Self {
        Self {
            source,
            clock,
            mono,
            state,
            interval_ms,
        }
    }

    /// One sync attempt. Success re-anchors the clock and sets the flag;
    /// a source failure clears the flag.
    pub async fn sync_once(&mut self) -> Result<u64, SyncError<T::Error>> {
        if !self.state.is_link_up() {
            debug!("Link down, skipping time sync");
            return Err(SyncError::LinkDown);
        }

        match self.source.fetch_unix_time().await {
            Ok(unix_secs) => {
                self.clock.calibrate(unix_secs, self.mono.now_ms());
                self.state.set_time_synced(true);
                info!("Time synced: {} UTC", unix_secs);
                Ok(unix_secs)
            }
            Err(e) => {
                warn!("Time sync failed: {:?}", dbg_fmt!(e));
                self.state.set_time_synced(false);
                Err(SyncError::Source(e))
            }
        }
    }

    pub async fn run<D: DelayNs>(&mut self, delay: &mut D) -> ! {
        loop {
            let _ = self.sync_once().await;
            delay.delay_ms(self.interval_ms).await;
        }
    }
}
