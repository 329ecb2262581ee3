use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aero_time::{ClockEntry, ClockEntryId, ClockEntryOwner, ClockSource, Direction};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::TimerError;

pub const DEFAULT_FREQUENCY_HZ: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparingTimerConfig {
    /// Input clock, in Hz. Negative values are seconds per input tick.
    pub frequency: i64,
    /// Counter value at which the count wraps back to zero. Immutable once built.
    pub limit: u64,
    pub compare: u64,
    pub divider: u32,
    /// Counter increment per (divided) input tick.
    pub step: u32,
    pub enabled: bool,
    pub event_enabled: bool,
}

impl Default for ComparingTimerConfig {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY_HZ,
            limit: u64::MAX,
            compare: u64::MAX,
            divider: 1,
            step: 1,
            enabled: false,
            event_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparingTimerState {
    pub compare: u64,
    pub accumulated: u64,
    pub frequency: i64,
    pub divider: u32,
    pub step: u32,
    pub event_enabled: bool,
}

type Listener = Box<dyn FnMut() + Send>;

#[derive(Debug)]
struct Counter {
    limit: u64,
    compare: u64,
    /// Whole periods elapsed since the last value/compare write; the live clock entry
    /// value is added on top.
    accumulated: u64,
    frequency: i64,
    divider: u32,
    step: u32,
    event_enabled: bool,
    initial: ComparingTimerConfig,
}

impl Counter {
    fn new(config: ComparingTimerConfig) -> Self {
        Self {
            limit: config.limit,
            compare: config.compare,
            accumulated: 0,
            frequency: config.frequency,
            divider: config.divider,
            step: config.step,
            event_enabled: config.event_enabled,
            initial: config,
        }
    }

    /// Distance to the nearer boundary still ahead of the counter.
    fn period(&self) -> u64 {
        let boundary = if self.compare > self.accumulated {
            self.compare
        } else {
            self.limit
        };
        boundary - self.accumulated
    }

    /// Resolves a clock match. Returns whether `CompareReached` should fire.
    fn resolve_match(&mut self, entry: &mut ClockEntry) -> bool {
        self.accumulated = self.accumulated.saturating_add(entry.period);

        if self.accumulated >= self.limit && self.compare != self.limit {
            // Wrapped at the limit. A compare value of zero sits exactly on the wrap.
            self.accumulated = 0;
            entry.period = self.period();
            return self.compare == 0 && self.event_enabled;
        }

        if self.accumulated >= self.limit {
            self.accumulated = 0;
            entry.period = self.period();
        } else {
            entry.period = self.limit - self.accumulated;
        }
        self.event_enabled
    }

    fn restore_initial(&mut self) {
        *self = Self::new(self.initial);
    }
}

struct Shared {
    name: String,
    counter: Mutex<Counter>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    fn counter(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClockEntryOwner for Shared {
    fn on_match(&self, entry: &mut ClockEntry) -> bool {
        let mut counter = self.counter();
        let fire = counter.resolve_match(entry);
        trace!(
            timer = %self.name,
            accumulated = counter.accumulated,
            next_period = entry.period,
            fire,
            "comparing timer matched"
        );
        fire
    }

    fn after_match(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter_mut() {
            listener();
        }
    }
}

/// Free-running up-counter with a wrap `limit` and an independent `compare` threshold.
///
/// The counter runs from 0 towards `limit` and wraps to 0 there. `CompareReached` fires when
/// the count reaches `compare`; hitting `limit` alone is silent unless `compare == limit`.
/// Internally the backing clock entry is always armed for whichever of the two boundaries
/// is nearer, so no tick-by-tick work is done in between.
///
/// Listeners registered with [`Self::on_compare_reached`] run synchronously while the clock is
/// advancing. They may read or reprogram this timer but must not register new listeners.
pub struct ComparingTimer {
    clock: Arc<ClockSource>,
    entry: ClockEntryId,
    shared: Arc<Shared>,
    limit: u64,
}

impl std::fmt::Debug for ComparingTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparingTimer")
            .field("name", &self.shared.name)
            .field("entry", &self.entry)
            .field("counter", &*self.shared.counter())
            .finish_non_exhaustive()
    }
}

impl ComparingTimer {
    pub fn new(
        clock: Arc<ClockSource>,
        name: impl Into<String>,
        config: ComparingTimerConfig,
    ) -> Result<Self, TimerError> {
        if config.limit == 0 {
            return Err(TimerError::InvalidArgument("limit must be non-zero"));
        }
        if config.frequency == 0 {
            return Err(TimerError::InvalidArgument("frequency must be non-zero"));
        }
        if config.divider == 0 {
            return Err(TimerError::InvalidArgument("divider must be non-zero"));
        }
        if config.step == 0 {
            return Err(TimerError::InvalidArgument("step must be non-zero"));
        }
        if config.compare > config.limit {
            return Err(TimerError::Construction {
                compare: config.compare,
                limit: config.limit,
            });
        }

        let counter = Counter::new(config);
        let entry = ClockEntry::new(counter.period(), config.frequency, Direction::Ascending)
            .with_divider(config.divider)
            .with_step(config.step)
            .with_enabled(config.enabled);

        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            counter: Mutex::new(counter),
            listeners: Mutex::new(Vec::new()),
        });
        let owner: Arc<dyn ClockEntryOwner> = shared.clone();
        let entry = clock.add_entry(name, entry, Arc::downgrade(&owner))?;

        Ok(Self {
            clock,
            entry,
            shared,
            limit: config.limit,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn clock_entry(&self) -> ClockEntryId {
        self.entry
    }

    fn exchange<R>(
        &self,
        f: impl FnOnce(&mut Counter, &mut ClockEntry) -> R,
    ) -> Result<R, TimerError> {
        Ok(self
            .clock
            .exchange_entry(self.entry, |entry| f(&mut self.shared.counter(), entry))?)
    }

    /// [`Self::exchange`] for updates that cannot be refused by the clock while this timer
    /// owns its entry.
    fn update(&self, what: &'static str, f: impl FnOnce(&mut Counter, &mut ClockEntry)) {
        if let Err(err) = self.exchange(f) {
            error!(timer = %self.shared.name, %err, "failed to update {what}");
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn enabled(&self) -> bool {
        self.clock
            .entry(self.entry)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    /// Starts or stops counting. The current count is kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.update("enabled", |_, entry| entry.enabled = enabled);
    }

    pub fn event_enabled(&self) -> bool {
        self.shared.counter().event_enabled
    }

    pub fn set_event_enabled(&self, enabled: bool) {
        self.shared.counter().event_enabled = enabled;
    }

    pub fn frequency(&self) -> i64 {
        self.shared.counter().frequency
    }

    pub fn set_frequency(&self, frequency: i64) -> Result<(), TimerError> {
        if frequency == 0 {
            return Err(TimerError::InvalidArgument("frequency must be non-zero"));
        }
        self.exchange(|counter, entry| {
            counter.frequency = frequency;
            entry.frequency = frequency;
        })
    }

    pub fn divider(&self) -> u32 {
        self.shared.counter().divider
    }

    pub fn set_divider(&self, divider: u32) -> Result<(), TimerError> {
        if divider == 0 {
            return Err(TimerError::InvalidArgument("divider must be non-zero"));
        }
        if divider == self.divider() {
            return Ok(());
        }
        self.exchange(|counter, entry| {
            counter.divider = divider;
            entry.divider = divider;
        })
    }

    pub fn step(&self) -> u32 {
        self.shared.counter().step
    }

    pub fn set_step(&self, step: u32) -> Result<(), TimerError> {
        if step == 0 {
            return Err(TimerError::InvalidArgument("step must be non-zero"));
        }
        if step == self.step() {
            return Ok(());
        }
        self.exchange(|counter, entry| {
            counter.step = step;
            entry.step = step;
        })
    }

    /// Current count, read atomically with respect to match processing.
    pub fn value(&self) -> u64 {
        self.clock
            .with_entry_locked(self.entry, |entry| {
                self.shared.counter().accumulated.saturating_add(entry.value)
            })
            .unwrap_or_else(|err| {
                error!(timer = %self.shared.name, %err, "clock entry missing");
                self.shared.counter().accumulated
            })
    }

    /// Writes the count. Writing `limit` wraps the counter to 0.
    pub fn set_value(&self, value: u64) -> Result<(), TimerError> {
        if value > self.limit {
            return Err(TimerError::InvalidArgument("value exceeds limit"));
        }
        self.exchange(|counter, entry| {
            counter.accumulated = if value == counter.limit { 0 } else { value };
            entry.value = 0;
            entry.period = counter.period();
        })
    }

    pub fn compare(&self) -> u64 {
        self.shared.counter().compare
    }

    pub fn set_compare(&self, compare: u64) -> Result<(), TimerError> {
        if compare > self.limit {
            return Err(TimerError::InvalidArgument("compare exceeds limit"));
        }
        self.exchange(|counter, entry| {
            counter.accumulated = counter.accumulated.saturating_add(entry.value);
            if counter.accumulated >= counter.limit {
                counter.accumulated = 0;
            }
            counter.compare = compare;
            entry.value = 0;
            entry.period = counter.period();
        })
    }

    /// Restores the configuration the timer was built with and zeroes the count.
    pub fn reset(&self) {
        self.update("reset", |counter, entry| {
            counter.restore_initial();
            let initial = counter.initial;
            entry.value = 0;
            entry.enabled = initial.enabled;
            entry.frequency = initial.frequency;
            entry.divider = initial.divider;
            entry.step = initial.step;
            entry.period = counter.period();
        });
    }

    /// Registers a `CompareReached` listener. Listeners run in registration order.
    pub fn on_compare_reached(&self, listener: impl FnMut() + Send + 'static) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    pub fn save_state(&self) -> ComparingTimerState {
        let counter = self.shared.counter();
        ComparingTimerState {
            compare: counter.compare,
            accumulated: counter.accumulated,
            frequency: counter.frequency,
            divider: counter.divider,
            step: counter.step,
            event_enabled: counter.event_enabled,
        }
    }

    /// Restores counter state. The live count and enable flag belong to the clock entry and
    /// are restored with [`ClockSource::load_state`].
    pub fn load_state(&self, state: &ComparingTimerState) -> Result<(), TimerError> {
        if state.compare > self.limit {
            return Err(TimerError::InvalidArgument("compare exceeds limit"));
        }
        if state.accumulated > self.limit {
            return Err(TimerError::InvalidArgument("value exceeds limit"));
        }
        if state.frequency == 0 || state.divider == 0 || state.step == 0 {
            return Err(TimerError::InvalidArgument(
                "frequency, divider and step must be non-zero",
            ));
        }
        self.exchange(|counter, entry| {
            counter.compare = state.compare;
            counter.accumulated = if state.accumulated == counter.limit {
                0
            } else {
                state.accumulated
            };
            counter.frequency = state.frequency;
            counter.divider = state.divider;
            counter.step = state.step;
            counter.event_enabled = state.event_enabled;
            entry.frequency = state.frequency;
            entry.divider = state.divider;
            entry.step = state.step;
            entry.period = counter.period();
        })
    }
}

impl Drop for ComparingTimer {
    fn drop(&mut self) {
        let _ = self.clock.remove_entry(self.entry);
    }
}
