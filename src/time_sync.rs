//! Server-anchored wall clock.
//!
//! The board has no RTC worth trusting, so every data source keeps the last
//! server timestamp together with the monotonic instant it arrived and
//! extrapolates from there. Civil-date conversion is done by hand; no
//! timezone database is involved.

use std::time::Instant;

/// Server epoch seconds paired with the monotonic instant they were captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochAnchor {
    server_epoch: i64,
    captured: Instant,
}

impl EpochAnchor {
    pub fn new(server_epoch: i64, captured: Instant) -> Self {
        Self {
            server_epoch,
            captured,
        }
    }

    pub fn server_epoch(&self) -> i64 {
        self.server_epoch
    }

    /// `server_epoch + max(0, now - captured)`, in whole seconds.
    pub fn current_epoch(&self, now: Instant) -> i64 {
        self.server_epoch + now.saturating_duration_since(self.captured).as_secs() as i64
    }
}

const DAYS_BEFORE_MONTH: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

pub fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days from 1970-01-01 to January 1st of `year`.
fn days_before_year(year: i64) -> i64 {
    let y = year - 1;
    365 * (year - 1970) + (y.div_euclid(4) - 1969 / 4) - (y.div_euclid(100) - 1969 / 100)
        + (y.div_euclid(400) - 1969 / 400)
}

/// Seconds since the Unix epoch for a UTC civil time. Fields are not range
/// checked beyond month 1..=12.
pub fn utc_epoch(year: i64, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<i64> {
    if !(1..=12).contains(&month) || day == 0 {
        return None;
    }
    let mut days = days_before_year(year) + DAYS_BEFORE_MONTH[(month - 1) as usize] + (day as i64 - 1);
    if month > 2 && is_leap_year(year) {
        days += 1;
    }
    Some(days * 86_400 + hour as i64 * 3_600 + minute as i64 * 60 + second as i64)
}

/// Parse `YYYY-MM-DDTHH:MM:SS[.fff]Z` by fixed offsets.
pub fn parse_iso_utc(text: &str) -> Option<i64> {
    let t = text.trim();
    if t.len() < 19 || !t.is_char_boundary(19) {
        return None;
    }
    let b = t.as_bytes();
    if b[4] != b'-' || b[7] != b'-' || !(b[10] == b'T' || b[10] == b' ') || b[13] != b':' || b[16] != b':' {
        return None;
    }
    let field = |from: usize, to: usize| t[from..to].parse::<u32>().ok();
    utc_epoch(
        t[0..4].parse::<i64>().ok()?,
        field(5, 7)?,
        field(8, 10)?,
        field(11, 13)?,
        field(14, 16)?,
        field(17, 19)?,
    )
}

/// Broken-down time. `weekday` counts from Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub weekday: u32,
}

pub fn civil_from_epoch(epoch: i64) -> CivilTime {
    let days = epoch.div_euclid(86_400);
    let secs = epoch.rem_euclid(86_400);

    // Shift to an era starting 0000-03-01 so leap days fall at year end.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);

    CivilTime {
        year,
        month,
        day,
        hour: (secs / 3_600) as u32,
        minute: ((secs % 3_600) / 60) as u32,
        second: (secs % 60) as u32,
        // 1970-01-01 was a Thursday.
        weekday: (days + 4).rem_euclid(7) as u32,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    Twelve,
    TwentyFour,
}

impl TimeFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "24" | "24h" => TimeFormat::TwentyFour,
            _ => TimeFormat::Twelve,
        }
    }
}

/// "H:MM" on the 12-hour clock (no AM/PM, the panel is too narrow) or "HH:MM".
pub fn format_clock(local_epoch: i64, format: TimeFormat) -> String {
    let t = civil_from_epoch(local_epoch);
    match format {
        TimeFormat::TwentyFour => format!("{:02}:{:02}", t.hour, t.minute),
        TimeFormat::Twelve => {
            let hour12 = match t.hour % 12 {
                0 => 12,
                h => h,
            };
            format!("{}:{:02}", hour12, t.minute)
        }
    }
}
