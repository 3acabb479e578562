//! Time capabilities

use core::fmt::Debug;

/// Monotonic millisecond counter since boot. Never wraps in practice.
pub trait Monotonic {
    fn now_ms(&self) -> u64;
}

/// Authoritative wall-clock source (SNTP, HTTP date, GPS...)
pub trait TimeSource {
    type Error: Debug;

    /// Fetch the current UTC time as seconds since the Unix epoch.
    fn fetch_unix_time(&mut self) -> impl core::future::Future<Output = Result<u64, Self::Error>>;
}
