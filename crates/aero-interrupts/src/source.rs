use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Id returned by an acknowledge when there is nothing to service. Never a valid source id.
pub const NO_IRQ: u32 = 0;

/// One interrupt input of the controller.
///
/// `state` mirrors the raw input level; `is_pending` is the latch the contexts arbitrate on.
/// The latch is set whenever the level is asserted and cleared by an acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqSource {
    id: u32,
    priority: u32,
    is_pending: bool,
    state: bool,
}

impl IrqSource {
    pub fn new(id: u32, priority: u32) -> Self {
        Self {
            id,
            priority,
            is_pending: false,
            state: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn set_pending(&mut self, pending: bool) {
        self.is_pending = pending;
    }

    /// Drives the input level. Asserting latches the source pending; deasserting leaves an
    /// already latched request in place.
    pub fn set_level(&mut self, level: bool) {
        self.state = level;
        self.is_pending |= level;
    }

    /// Re-latches from the raw level, as done when the interrupt's handler completes.
    pub fn relatch(&mut self) {
        self.is_pending = self.state;
    }

    pub(crate) fn clear(&mut self, priority: u32) {
        *self = Self::new(self.id, priority);
    }
}

/// Controller-owned table of interrupt sources, keyed by id.
///
/// Contexts refer to sources by id only, so the table is the single owner of source state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrqSources {
    sources: BTreeMap<u32, IrqSource>,
}

impl IrqSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources `1..=count`, all at `priority`.
    pub fn with_count(count: u32, priority: u32) -> Self {
        Self {
            sources: (1..=count)
                .map(|id| (id, IrqSource::new(id, priority)))
                .collect(),
        }
    }

    /// Adds or replaces a source. Returns `false` for the reserved id [`NO_IRQ`].
    pub fn insert(&mut self, source: IrqSource) -> bool {
        if source.id == NO_IRQ {
            warn!("irq id 0 is reserved");
            return false;
        }
        self.sources.insert(source.id, source);
        true
    }

    pub fn get(&self, id: u32) -> Option<&IrqSource> {
        self.sources.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut IrqSource> {
        self.sources.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sources.contains_key(&id)
    }

    /// Sources in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &IrqSource> + '_ {
        self.sources.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut IrqSource> + '_ {
        self.sources.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_latches_pending_until_relatched() {
        let mut source = IrqSource::new(4, 1);
        source.set_level(true);
        source.set_level(false);
        assert!(source.is_pending());
        assert!(!source.state());

        source.relatch();
        assert!(!source.is_pending());
    }

    #[test]
    fn id_zero_is_reserved() {
        let mut sources = IrqSources::with_count(3, 1);
        assert!(!sources.insert(IrqSource::new(NO_IRQ, 1)));
        assert_eq!(sources.len(), 3);
        assert_eq!(
            sources.iter().map(IrqSource::id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
