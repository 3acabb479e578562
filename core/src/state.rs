//! Shared connectivity flags and the status board
//!
//! Each flag has exactly one writer:
//! - `link_up` / `link_connecting`: link orchestrator
//! - `time_synced`: time sync service
//! - `session_ready`: messaging orchestrator
//!
//! Readers take a [`Readiness`] snapshot.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::sampling::OverallSummary;

#[derive(Debug, Default)]
pub struct ConnectivityState {
    link_up: AtomicBool,
    link_connecting: AtomicBool,
    time_synced: AtomicBool,
    session_ready: AtomicBool,
}

/// Point-in-time copy of all connectivity flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readiness {
    pub link_up: bool,
    pub link_connecting: bool,
    pub time_synced: bool,
    pub session_ready: bool,
}

impl Readiness {
    /// Live delivery needs link, synchronized time and a messaging session
    pub fn is_live_eligible(&self) -> bool {
        self.link_up && self.time_synced && self.session_ready
    }
}

impl ConnectivityState {
    pub const fn new() -> Self {
        Self {
            link_up: AtomicBool::new(false),
            link_connecting: AtomicBool::new(false),
            time_synced: AtomicBool::new(false),
            session_ready: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Readiness {
        Readiness {
            link_up: self.is_link_up(),
            link_connecting: self.link_connecting.load(Ordering::Acquire),
            time_synced: self.is_time_synced(),
            session_ready: self.is_session_ready(),
        }
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub fn is_time_synced(&self) -> bool {
        self.time_synced.load(Ordering::Acquire)
    }

    pub fn is_session_ready(&self) -> bool {
        self.session_ready.load(Ordering::Acquire)
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Release);
    }

    pub fn set_link_connecting(&self, connecting: bool) {
        self.link_connecting.store(connecting, Ordering::Release);
    }

    pub fn set_time_synced(&self, synced: bool) {
        self.time_synced.store(synced, Ordering::Release);
    }

    pub fn set_session_ready(&self, ready: bool) {
        self.session_ready.store(ready, Ordering::Release);
    }
}

/// Latest cycle result kept for a local display
pub struct StatusBoard<M: RawMutex> {
    overall: Mutex<M, Cell<Option<OverallSummary>>>,
}

impl<M: RawMutex> StatusBoard<M> {
    pub const fn new() -> Self {
        Self {
            overall: Mutex::new(Cell::new(None)),
        }
    }

    pub fn publish(&self, summary: OverallSummary) {
        self.overall.lock(|cell| cell.set(Some(summary)));
    }

    pub fn latest(&self) -> Option<OverallSummary> {
        self.overall.lock(|cell| cell.get())
    }
}

impl<M: RawMutex> Default for StatusBoard<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_live_eligibility_needs_all_flags() {
        let state = ConnectivityState::new();
        assert!(!state.snapshot().is_live_eligible());

        state.set_link_up(true);
        state.set_time_synced(true);
        assert!(!state.snapshot().is_live_eligible());

        state.set_session_ready(true);
        assert!(state.snapshot().is_live_eligible());

        state.set_time_synced(false);
        assert!(!state.snapshot().is_live_eligible());
    }

    #[test]
    fn test_status_board_keeps_latest() {
        let board = StatusBoard::<NoopRawMutex>::new();
        assert!(board.latest().is_none());

        let summary = OverallSummary {
            avg_temperature: Some(22.4),
            ..Default::default()
        };
        board.publish(summary);
        assert_eq!(board.latest().unwrap().avg_temperature, Some(22.4));
    }
}
