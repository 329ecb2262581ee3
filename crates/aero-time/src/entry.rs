use serde::{Deserialize, Serialize};

use crate::ClockError;

const NS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkMode {
    OneShot,
    Periodic,
}

/// Parameters of one counter driven by a [`ClockSource`](crate::ClockSource).
///
/// The entry ticks at `frequency / divider` Hz. A negative `frequency` is read as a period
/// instead: the entry ticks once every `|frequency| * divider` seconds. Every tick moves
/// `value` by `step` towards the match point:
///
/// - [`Direction::Ascending`] counts up from 0 and matches once `value >= period`.
/// - [`Direction::Descending`] counts down from `period` and matches at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntry {
    pub period: u64,
    pub frequency: i64,
    pub divider: u32,
    pub step: u32,
    pub value: u64,
    pub enabled: bool,
    pub direction: Direction,
    pub work_mode: WorkMode,
}

impl ClockEntry {
    /// A disabled, periodic entry with `divider = 1` and `step = 1`, positioned at the start of
    /// its count in the given direction.
    pub fn new(period: u64, frequency: i64, direction: Direction) -> Self {
        Self {
            period,
            frequency,
            divider: 1,
            step: 1,
            value: Self::start_value(direction, period),
            enabled: false,
            direction,
            work_mode: WorkMode::Periodic,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_work_mode(mut self, work_mode: WorkMode) -> Self {
        self.work_mode = work_mode;
        self
    }

    pub fn with_divider(mut self, divider: u32) -> Self {
        self.divider = divider;
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn validate(&self) -> Result<(), ClockError> {
        let reason = if self.period == 0 {
            "period must be non-zero"
        } else if self.frequency == 0 {
            "frequency must be non-zero"
        } else if self.divider == 0 {
            "divider must be non-zero"
        } else if self.step == 0 {
            "step must be non-zero"
        } else {
            return Ok(());
        };
        Err(ClockError::InvalidEntry(reason))
    }

    fn start_value(direction: Direction, period: u64) -> u64 {
        match direction {
            Direction::Ascending => 0,
            Direction::Descending => period,
        }
    }

    /// Tick rate as the fraction `numer / denom` ticks per nanosecond.
    pub(crate) fn rate(&self) -> (u128, u128) {
        let divider = u128::from(self.divider.max(1));
        if self.frequency > 0 {
            (self.frequency as u128, divider * NS_PER_SEC)
        } else {
            (1, u128::from(self.frequency.unsigned_abs()) * divider * NS_PER_SEC)
        }
    }

    pub(crate) fn same_rate(&self, other: &ClockEntry) -> bool {
        self.frequency == other.frequency && self.divider == other.divider
    }

    /// Ticks left until the entry matches; `0` means it matches now.
    pub(crate) fn ticks_until_match(&self) -> u64 {
        let step = u64::from(self.step.max(1));
        let distance = match self.direction {
            Direction::Ascending => self.period.saturating_sub(self.value),
            Direction::Descending => self.value,
        };
        distance.div_ceil(step)
    }

    pub(crate) fn apply_ticks(&mut self, ticks: u64) {
        let delta = ticks.saturating_mul(u64::from(self.step));
        self.value = match self.direction {
            Direction::Ascending => self.value.saturating_add(delta),
            Direction::Descending => self.value.saturating_sub(delta),
        };
    }

    /// Moves the counter past a match: periodic entries reload (ascending ones keep any
    /// overshoot), one-shot entries stop at their terminal value.
    pub(crate) fn complete_match(&mut self) {
        match (self.direction, self.work_mode) {
            (Direction::Ascending, WorkMode::Periodic) => {
                self.value = self.value.saturating_sub(self.period);
            }
            (Direction::Descending, WorkMode::Periodic) => {
                self.value = self.period;
            }
            (_, WorkMode::OneShot) => {
                self.value = 0;
                self.enabled = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_entries_start_at_period() {
        let entry = ClockEntry::new(40, 1_000, Direction::Descending);
        assert_eq!(entry.value, 40);
        assert_eq!(entry.ticks_until_match(), 40);
    }

    #[test]
    fn step_rounds_distance_up() {
        let entry = ClockEntry::new(35, 1_000, Direction::Ascending).with_step(10);
        assert_eq!(entry.ticks_until_match(), 4);
    }

    #[test]
    fn negative_frequency_is_seconds_per_tick() {
        let entry = ClockEntry::new(1, -2, Direction::Ascending).with_divider(3);
        assert_eq!(entry.rate(), (1, 6 * 1_000_000_000));
    }

    #[test]
    fn ascending_periodic_match_keeps_overshoot() {
        let mut entry = ClockEntry::new(35, 1_000, Direction::Ascending).with_step(10);
        entry.apply_ticks(4);
        assert_eq!(entry.value, 40);
        entry.complete_match();
        assert_eq!(entry.value, 5);
    }

    #[test]
    fn zero_fields_are_rejected() {
        let entry = ClockEntry::new(0, 1, Direction::Ascending);
        assert_eq!(
            entry.validate(),
            Err(ClockError::InvalidEntry("period must be non-zero"))
        );
        let entry = ClockEntry::new(1, 1, Direction::Ascending).with_step(0);
        assert!(entry.validate().is_err());
    }
}
