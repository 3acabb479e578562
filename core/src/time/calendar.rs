//! Calendar conversions using O(1) algorithms
//!
//! Implements Howard Hinnant's civil_from_days algorithm.
//! Reference: http://howardhinnant.github.io/date_algorithms.html
//!
//! Valid for every date in the proleptic Gregorian calendar that fits the
//! `u16` year, which covers any timestamp this firmware produces.

use core::fmt::Write;

use heapless::String;

const SECONDS_PER_DAY: i64 = 86_400;

/// `YYYY-MM-DDTHH:MM:SS`
pub const ISO_LEN: usize = 19;

/// Local timestamp rendered without zone designator
pub type IsoTimestamp = String<ISO_LEN>;

/// Broken-down civil time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Convert seconds since the Unix epoch. Negative values count back
    /// from 1970-01-01.
    pub fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(SECONDS_PER_DAY);
        let secs_today = secs.rem_euclid(SECONDS_PER_DAY);

        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }

    pub fn to_iso(&self) -> IsoTimestamp {
        let mut out = IsoTimestamp::new();
        // 19 characters for any four-digit year; cannot overflow the buffer.
        let _ = write!(
            out,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        out
    }
}

/// Convert days since Unix epoch to civil date (year, month, day)
fn civil_from_days(days_since_epoch: i64) -> (u16, u8, u8) {
    // Shift epoch from 1970-01-01 to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + 719_468;

    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32; // day of era [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let y = i64::from(yoe) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // March = 0
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if m <= 2 { y + 1 } else { y };

    (year as u16, m, d)
}
