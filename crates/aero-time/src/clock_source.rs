use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{ClockEntry, ClockError};

/// Receives match notifications for one clock entry.
///
/// [`Self::on_match`] runs while the clock is locked and may rewrite the entry in place
/// (period, value, enable). It must not call back into the [`ClockSource`]. When it returns
/// `true`, [`Self::after_match`] runs once the lock has been released and before the clock
/// moves on to the next event.
pub trait ClockEntryOwner: Send + Sync {
    fn on_match(&self, entry: &mut ClockEntry) -> bool;

    fn after_match(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockEntryId(u32);

impl ClockEntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntryState {
    pub name: String,
    pub entry: ClockEntry,
    /// Fractional tick progress, in units of the entry's rate denominator.
    pub residue: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSourceState {
    pub now_ns: u64,
    pub entries: Vec<ClockEntryState>,
}

struct Slot {
    name: String,
    entry: ClockEntry,
    residue: u128,
    owner: Weak<dyn ClockEntryOwner>,
}

impl Slot {
    fn ns_until_match(&self) -> Option<u64> {
        if !self.entry.enabled {
            return None;
        }
        let ticks = self.entry.ticks_until_match();
        if ticks == 0 {
            return Some(0);
        }
        let (numer, denom) = self.entry.rate();
        let needed = u128::from(ticks)
            .saturating_mul(denom)
            .saturating_sub(self.residue);
        Some(u64::try_from(needed.div_ceil(numer)).unwrap_or(u64::MAX))
    }

    fn advance_ns(&mut self, ns: u64) {
        if !self.entry.enabled || ns == 0 {
            return;
        }
        let (numer, denom) = self.entry.rate();
        let total = u128::from(ns)
            .saturating_mul(numer)
            .saturating_add(self.residue);
        self.residue = total % denom;
        let ticks = u64::try_from(total / denom).unwrap_or(u64::MAX);
        self.entry.apply_ticks(ticks);
    }
}

#[derive(Default)]
struct Inner {
    now_ns: u64,
    slots: Vec<Option<Slot>>,
}

impl Inner {
    fn slot(&self, id: ClockEntryId) -> Result<&Slot, ClockError> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(ClockError::UnknownEntry(id))
    }

    fn slot_mut(&mut self, id: ClockEntryId) -> Result<&mut Slot, ClockError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(ClockError::UnknownEntry(id))
    }

    fn find(&self, name: &str) -> Option<ClockEntryId> {
        self.slots.iter().enumerate().find_map(|(idx, slot)| {
            slot.as_ref()
                .filter(|slot| slot.name == name)
                .map(|_| ClockEntryId(idx as u32))
        })
    }

    /// Runs the owner of every entry sitting on its match point, in registration order.
    ///
    /// Returns whether anything matched, and the owners that asked for a post-match call.
    fn fire_matches(&mut self) -> (bool, Vec<Arc<dyn ClockEntryOwner>>) {
        let now_ns = self.now_ns;
        let mut matched = false;
        let mut notify = Vec::new();

        for slot in self.slots.iter_mut().flatten() {
            if !slot.entry.enabled || slot.entry.ticks_until_match() != 0 {
                continue;
            }
            matched = true;
            slot.entry.complete_match();
            trace!(entry = %slot.name, now_ns, "clock entry matched");

            let Some(owner) = slot.owner.upgrade() else {
                continue;
            };
            let before = slot.entry;
            if owner.on_match(&mut slot.entry) {
                notify.push(owner);
            }
            if let Err(err) = slot.entry.validate() {
                warn!(entry = %slot.name, %err, "match handler left entry invalid; keeping previous parameters");
                slot.entry = before;
            }
            if !slot.entry.same_rate(&before) {
                slot.residue = 0;
            }
        }

        (matched, notify)
    }
}

/// Virtual time axis driving a table of named [`ClockEntry`] counters.
///
/// Time only moves through [`Self::advance`] / [`Self::advance_to`], which step from event to
/// event so every match is observed exactly once and in time order. Entries matching at the
/// same instant are processed in registration order.
pub struct ClockSource {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ClockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ClockSource")
            .field("now_ns", &inner.now_ns)
            .field("entries", &inner.slots.iter().flatten().count())
            .finish_non_exhaustive()
    }
}

impl Default for ClockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time, in nanoseconds since reset.
    pub fn now_ns(&self) -> u64 {
        self.lock().now_ns
    }

    pub fn add_entry(
        &self,
        name: impl Into<String>,
        entry: ClockEntry,
        owner: Weak<dyn ClockEntryOwner>,
    ) -> Result<ClockEntryId, ClockError> {
        let name = name.into();
        entry.validate()?;

        let mut inner = self.lock();
        if inner.find(&name).is_some() {
            return Err(ClockError::DuplicateName(name));
        }
        let id = ClockEntryId(inner.slots.len() as u32);
        trace!(entry = %name, ?id, "clock entry registered");
        inner.slots.push(Some(Slot {
            name,
            entry,
            residue: 0,
            owner,
        }));
        Ok(id)
    }

    /// Unregisters an entry. Ids are never reused.
    pub fn remove_entry(&self, id: ClockEntryId) -> Result<ClockEntry, ClockError> {
        let mut inner = self.lock();
        inner
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .map(|slot| slot.entry)
            .ok_or(ClockError::UnknownEntry(id))
    }

    pub fn entry_id(&self, name: &str) -> Result<ClockEntryId, ClockError> {
        self.lock()
            .find(name)
            .ok_or_else(|| ClockError::UnknownName(name.to_string()))
    }

    /// Snapshot of an entry's parameters.
    pub fn entry(&self, id: ClockEntryId) -> Result<ClockEntry, ClockError> {
        Ok(self.lock().slot(id)?.entry)
    }

    /// Runs `f` against an entry while the clock is locked, so the read cannot interleave
    /// with match processing.
    pub fn with_entry_locked<R>(
        &self,
        id: ClockEntryId,
        f: impl FnOnce(&ClockEntry) -> R,
    ) -> Result<R, ClockError> {
        let inner = self.lock();
        Ok(f(&inner.slot(id)?.entry))
    }

    /// Atomic read-modify-write of an entry.
    ///
    /// If `f` leaves the entry invalid the previous parameters are kept and
    /// [`ClockError::InvalidEntry`] is returned. Changing the tick rate discards any partial
    /// tick accumulated at the old rate.
    pub fn exchange_entry<R>(
        &self,
        id: ClockEntryId,
        f: impl FnOnce(&mut ClockEntry) -> R,
    ) -> Result<R, ClockError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(id)?;
        let before = slot.entry;
        let out = f(&mut slot.entry);
        if let Err(err) = slot.entry.validate() {
            slot.entry = before;
            return Err(err);
        }
        if !slot.entry.same_rate(&before) {
            slot.residue = 0;
        }
        Ok(out)
    }

    pub fn advance(&self, delta_ns: u64) {
        let target_ns = self.now_ns().saturating_add(delta_ns);
        self.advance_to(target_ns);
    }

    /// Advances virtual time to `target_ns`, delivering every match on the way.
    ///
    /// Requests to move backwards are ignored.
    pub fn advance_to(&self, target_ns: u64) {
        loop {
            let notify = {
                let mut inner = self.lock();
                if target_ns < inner.now_ns {
                    warn!(
                        now_ns = inner.now_ns,
                        target_ns, "ignoring request to move virtual time backwards"
                    );
                    return;
                }

                let remaining = target_ns - inner.now_ns;
                let step = inner
                    .slots
                    .iter()
                    .flatten()
                    .filter_map(Slot::ns_until_match)
                    .fold(remaining, u64::min);
                for slot in inner.slots.iter_mut().flatten() {
                    slot.advance_ns(step);
                }
                inner.now_ns += step;

                let (matched, notify) = inner.fire_matches();
                if !matched && inner.now_ns == target_ns {
                    return;
                }
                notify
            };

            for owner in notify {
                owner.after_match();
            }
        }
    }

    pub fn save_state(&self) -> ClockSourceState {
        let inner = self.lock();
        ClockSourceState {
            now_ns: inner.now_ns,
            entries: inner
                .slots
                .iter()
                .flatten()
                .map(|slot| ClockEntryState {
                    name: slot.name.clone(),
                    entry: slot.entry,
                    residue: slot.residue,
                })
                .collect(),
        }
    }

    /// Restores time and entry parameters.
    ///
    /// Entries are matched by name and must already be registered by their owners; entries
    /// missing from `state` keep their current parameters. Nothing is applied unless the
    /// whole snapshot is valid.
    pub fn load_state(&self, state: &ClockSourceState) -> Result<(), ClockError> {
        let mut inner = self.lock();

        let mut resolved = Vec::with_capacity(state.entries.len());
        for saved in &state.entries {
            let id = inner
                .find(&saved.name)
                .ok_or_else(|| ClockError::UnknownName(saved.name.clone()))?;
            saved.entry.validate()?;
            let (_, denom) = saved.entry.rate();
            if saved.residue >= denom {
                return Err(ClockError::InvalidEntry("residue exceeds one tick"));
            }
            resolved.push((id, saved));
        }

        inner.now_ns = state.now_ns;
        for (id, saved) in resolved {
            let slot = inner.slot_mut(id)?;
            slot.entry = saved.entry;
            slot.residue = saved.residue;
        }
        Ok(())
    }
}
