//! Five-field cron matcher (minute hour day-of-month month day-of-week).

use log::warn;

use crate::time_sync::CivilTime;

/// Allowed values of one field as a bitmask. `None` matches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field(Option<u64>);

impl Field {
    fn parse(text: &str, min: u32, max: u32) -> Self {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return Field(None);
        }
        let mut mask = 0u64;
        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match expand_part(part, min, max) {
                Some(bits) => mask |= bits,
                None => {
                    warn!("Cron field {:?} has bad part {:?}, treating as *", text, part);
                    return Field(None);
                }
            }
        }
        if mask == 0 {
            warn!("Cron field {:?} selects no value in {}-{}, treating as *", text, min, max);
            Field(None)
        } else {
            Field(Some(mask))
        }
    }

    fn matches(self, value: u32) -> bool {
        match self.0 {
            None => true,
            Some(mask) => value < 64 && mask & (1 << value) != 0,
        }
    }
}

fn range_bits(start: u32, end: u32, step: u32, max: u32) -> u64 {
    let end = end.min(max);
    let mut bits = 0u64;
    let mut v = start;
    while v <= end {
        bits |= 1 << v;
        match v.checked_add(step) {
            Some(next) => v = next,
            None => break,
        }
    }
    bits
}

fn expand_part(part: &str, min: u32, max: u32) -> Option<u64> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, step.trim().parse::<u32>().ok().filter(|s| *s > 0)),
        None => (part, None),
    };
    if base == "*" {
        return Some(range_bits(min, max, step.unwrap_or(1), max));
    }
    if let Some((start, end)) = base.split_once('-') {
        let start: u32 = start.trim().parse().ok()?;
        let end: u32 = end.trim().parse().ok()?;
        return Some(range_bits(start, end, step.unwrap_or(1), max));
    }
    let value: u32 = base.trim().parse().ok()?;
    match step {
        // "5/15" runs from 5 to the field maximum.
        Some(step) if step > 1 => Some(range_bits(value, max, step, max)),
        _ if value <= max => Some(1 << value),
        _ => Some(0),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Self {
        let mut fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.is_empty() {
            fields = vec!["*"; 5];
        } else if fields.len() != 5 {
            warn!("Bad cron {:?} (expected 5 fields), matching every minute", expr);
            fields = vec!["*"; 5];
        }
        let mut day_of_week = Field::parse(fields[4], 0, 7);
        // 7 is another name for Sunday.
        if let Field(Some(mask)) = day_of_week {
            if mask & (1 << 7) != 0 {
                day_of_week = Field(Some(mask | 1));
            }
        }
        Self {
            minute: Field::parse(fields[0], 0, 59),
            hour: Field::parse(fields[1], 0, 23),
            day_of_month: Field::parse(fields[2], 1, 31),
            month: Field::parse(fields[3], 1, 12),
            day_of_week,
        }
    }

    pub fn matches(&self, t: &CivilTime) -> bool {
        self.minute.matches(t.minute)
            && self.hour.matches(t.hour)
            && self.day_of_month.matches(t.day)
            && self.month.matches(t.month)
            && self.day_of_week.matches(t.weekday)
    }
}
