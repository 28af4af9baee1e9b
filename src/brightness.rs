//! Potentiometer knob mapped to panel brightness in `0.0..=1.0`.

use std::time::{Duration, Instant};

/// How often the scheduler samples the knob.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessReading {
    pub value: f32,
    pub changed: bool,
    pub raw: u16,
}

#[derive(Debug, Clone)]
pub struct BrightnessKnob {
    min: f32,
    max: f32,
    invert: bool,
    smoothing: f32,
    deadband: f32,
    filtered: Option<f32>,
    last: Option<f32>,
    last_poll: Option<Instant>,
}

fn clamp01(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl Default for BrightnessKnob {
    fn default() -> Self {
        Self::new(0.0, 1.0, false)
    }
}

impl BrightnessKnob {
    pub fn new(min: f32, max: f32, invert: bool) -> Self {
        let min = clamp01(min);
        let max = clamp01(max).max(min);
        Self {
            min,
            max,
            invert,
            smoothing: 0.2,
            deadband: 0.01,
            filtered: None,
            last: None,
            last_poll: None,
        }
    }

    pub fn value(&self) -> Option<f32> {
        self.last
    }

    /// True when `POLL_INTERVAL` has passed since the last accepted poll.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last_poll {
            Some(t) if now.saturating_duration_since(t) < POLL_INTERVAL => false,
            _ => {
                self.last_poll = Some(now);
                true
            }
        }
    }

    /// Feed a 16-bit ADC sample.
    pub fn read(&mut self, raw: u16) -> BrightnessReading {
        let mut level = f32::from(raw) / 65_535.0;
        if self.invert {
            level = 1.0 - level;
        }
        let scaled = self.min + clamp01(level) * (self.max - self.min);
        let filtered = match self.filtered {
            Some(prev) if self.smoothing > 0.0 => (1.0 - self.smoothing) * prev + self.smoothing * scaled,
            _ => scaled,
        };
        self.filtered = Some(filtered);

        match self.last {
            Some(last) if (filtered - last).abs() < self.deadband => BrightnessReading {
                value: last,
                changed: false,
                raw,
            },
            _ => {
                self.last = Some(filtered);
                BrightnessReading {
                    value: filtered,
                    changed: true,
                    raw,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_is_unsmoothed() {
        let mut knob = BrightnessKnob::default();
        let r = knob.read(65_535);
        assert!(r.changed);
        assert!((r.value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn smoothing_and_deadband() {
        let mut knob = BrightnessKnob::default();
        knob.read(0);
        let r = knob.read(65_535);
        assert!(r.changed);
        assert!((r.value - 0.2).abs() < 1e-4);
        // A jitter of a few counts stays inside the deadband.
        let mut steady = BrightnessKnob::default();
        steady.read(32_768);
        let r = steady.read(32_900);
        assert!(!r.changed);
        assert_eq!(r.raw, 32_900);
    }

    #[test]
    fn range_and_invert() {
        let mut knob = BrightnessKnob::new(0.2, 0.6, true);
        assert!((knob.read(0).value - 0.6).abs() < 1e-6);
        let mut knob = BrightnessKnob::new(0.8, 0.3, false);
        assert!((knob.read(65_535).value - 0.8).abs() < 1e-6);
    }

    #[test]
    fn poll_cadence() {
        let t0 = Instant::now();
        let mut knob = BrightnessKnob::default();
        assert!(knob.due(t0));
        assert!(!knob.due(t0 + Duration::from_millis(50)));
        assert!(knob.due(t0 + POLL_INTERVAL));
    }
}
