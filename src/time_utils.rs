use chrono::{Local, Timelike};
use std::time::Instant;

/// The only wall-clock fields the clock face ever looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WallTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl WallTime {
    pub fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self { hour, minute, second }
    }

    pub fn is_pm(&self) -> bool {
        self.hour >= 12
    }

    pub fn hour12(&self) -> u32 {
        if self.hour == 0 { 12 } else if self.hour > 12 { self.hour - 12 } else { self.hour }
    }

    pub fn hour_text(&self, ampm: bool) -> String {
        format_field(if ampm { self.hour12() } else { self.hour })
    }

    pub fn ampm_label(&self) -> &'static str {
        if self.is_pm() { "PM" } else { "AM" }
    }
}

/// Two-digit card text. Time fields never reach 100, anything else is a bug.
pub fn format_field(value: u32) -> String {
    assert!(value < 100, "time field {} does not fit a card", value);
    format!("{:02}", value)
}

/// Monotonic ticks for animation plus wall-clock time for the face.
pub trait TimeSource {
    fn ticks(&self) -> u64;
    fn wall_clock(&self) -> WallTime;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn ticks(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn wall_clock(&self) -> WallTime {
        let now = Local::now();
        WallTime::new(now.hour(), now.minute(), now.second())
    }
}

#[cfg(test)]
pub mod manual {
    use super::{TimeSource, WallTime};
    use std::cell::Cell;

    /// Test clock advanced by hand.
    pub struct ManualClock {
        pub ticks: Cell<u64>,
        pub wall: Cell<WallTime>,
    }

    impl ManualClock {
        pub fn new(wall: WallTime) -> Self {
            Self { ticks: Cell::new(1_000), wall: Cell::new(wall) }
        }

        pub fn advance(&self, ms: u64) {
            self.ticks.set(self.ticks.get() + ms);
        }

        pub fn set_wall(&self, wall: WallTime) {
            self.wall.set(wall);
        }
    }

    impl TimeSource for ManualClock {
        fn ticks(&self) -> u64 {
            self.ticks.get()
        }

        fn wall_clock(&self) -> WallTime {
            self.wall.get()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_hour_mapping() {
        assert_eq!(WallTime::new(0, 0, 0).hour_text(true), "12");
        assert_eq!(WallTime::new(11, 0, 0).hour_text(true), "11");
        assert_eq!(WallTime::new(12, 0, 0).hour_text(true), "12");
        assert_eq!(WallTime::new(13, 0, 0).hour_text(true), "01");
        assert_eq!(WallTime::new(13, 0, 0).hour_text(false), "13");
    }

    #[test]
    fn half_of_day() {
        assert_eq!(WallTime::new(11, 59, 59).ampm_label(), "AM");
        assert_eq!(WallTime::new(12, 0, 0).ampm_label(), "PM");
        assert_eq!(WallTime::new(0, 0, 0).ampm_label(), "AM");
    }

    #[test]
    fn fields_are_zero_padded() {
        assert_eq!(format_field(0), "00");
        assert_eq!(format_field(7), "07");
        assert_eq!(format_field(59), "59");
    }

    #[test]
    #[should_panic]
    fn oversized_field_fails_fast() {
        format_field(100);
    }

    #[test]
    fn default_system_clock_starts_near_zero() {
        let clock = SystemClock::default();
        assert!(clock.ticks() < 1_000);
        assert!(clock.wall_clock().hour < 24);
    }
}
