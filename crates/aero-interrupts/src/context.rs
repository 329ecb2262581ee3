use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{IrqSources, ProtocolError, ServiceStack, NO_IRQ};

/// Output side of the controller: one interrupt line per context.
pub trait IrqLineSink {
    fn set_line(&mut self, context: u32, asserted: bool);
}

impl IrqLineSink for Vec<bool> {
    fn set_line(&mut self, context: u32, asserted: bool) {
        if let Some(line) = self.get_mut(context as usize) {
            *line = asserted;
        }
    }
}

/// Controller state a context arbitrates against.
pub struct ContextEnv<'a> {
    pub sources: &'a mut IrqSources,
    /// Debug override: when set, only the named context sees interrupts.
    pub forced_context: Option<u32>,
    pub lines: &'a mut dyn IrqLineSink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqContextState {
    pub id: u32,
    pub priority_threshold: u64,
    pub enabled_sources: Vec<u32>,
    /// Outermost first.
    pub active_interrupts: Vec<u32>,
}

/// One interrupt target (typically a hart in a given privilege mode).
///
/// The context picks at most one interrupt per acknowledge and keeps every acknowledged,
/// not yet completed interrupt on a [`ServiceStack`]. Its output line is asserted while an
/// enabled source is pending with a priority strictly above the one being serviced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqContext {
    id: u32,
    priority_threshold: u64,
    enabled_sources: BTreeSet<u32>,
    active_interrupts: ServiceStack,
}

impl IrqContext {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            priority_threshold: 0,
            enabled_sources: BTreeSet::new(),
            active_interrupts: ServiceStack::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn priority_threshold(&self) -> u64 {
        self.priority_threshold
    }

    /// Only affects future acknowledges; the output line is left as is.
    pub fn set_priority_threshold(&mut self, threshold: u64) {
        if threshold == self.priority_threshold {
            return;
        }
        trace!(context = self.id, threshold, "priority threshold changed");
        self.priority_threshold = threshold;
    }

    pub fn is_enabled(&self, irq: u32) -> bool {
        self.enabled_sources.contains(&irq)
    }

    /// Enabled source ids, ascending.
    pub fn enabled_sources(&self) -> impl Iterator<Item = u32> + '_ {
        self.enabled_sources.iter().copied()
    }

    pub fn active_interrupts(&self) -> &ServiceStack {
        &self.active_interrupts
    }

    /// Back to power-on: no enables, threshold 0, nothing in service.
    pub fn reset(&mut self, env: &mut ContextEnv<'_>) {
        self.priority_threshold = 0;
        self.enabled_sources.clear();
        self.active_interrupts.clear();
        self.refresh_interrupt(env);
    }

    pub fn enable_source(&mut self, env: &mut ContextEnv<'_>, irq: u32, enabled: bool) {
        if enabled {
            self.enabled_sources.insert(irq);
        } else {
            self.enabled_sources.remove(&irq);
        }
        trace!(context = self.id, irq, enabled, "source enable changed");
        self.refresh_interrupt(env);
    }

    fn forced_elsewhere(&self, forced_context: Option<u32>) -> bool {
        forced_context.is_some_and(|forced| forced != self.id)
    }

    /// Highest-priority enabled pending source; equal priorities resolve to the lowest id.
    fn best_pending(&self, sources: &IrqSources) -> Option<(u32, u32)> {
        let mut best: Option<(u32, u32)> = None;
        for source in self
            .enabled_sources
            .iter()
            .filter_map(|&irq| sources.get(irq))
            .filter(|source| source.is_pending())
        {
            if best.map_or(true, |(_, priority)| source.priority() > priority) {
                best = Some((source.id(), source.priority()));
            }
        }
        best
    }

    /// Claims the best pending interrupt and returns its id, or [`NO_IRQ`].
    ///
    /// The winner's pending latch is cleared even when its priority is below the threshold;
    /// such an interrupt is dropped rather than pushed on the service stack and will only
    /// be offered again once its source re-asserts.
    pub fn acknowledge_pending_interrupt(&mut self, env: &mut ContextEnv<'_>) -> u32 {
        if self.forced_elsewhere(env.forced_context) {
            return NO_IRQ;
        }

        let Some((irq, priority)) = self.best_pending(env.sources) else {
            trace!(context = self.id, "no pending interrupt to acknowledge");
            return NO_IRQ;
        };

        if let Some(source) = env.sources.get_mut(irq) {
            source.set_pending(false);
        }

        if u64::from(priority) >= self.priority_threshold {
            self.active_interrupts.push(irq);
            trace!(context = self.id, irq, priority, "interrupt acknowledged");
            self.refresh_interrupt(env);
            irq
        } else {
            debug!(
                context = self.id,
                irq,
                priority,
                threshold = self.priority_threshold,
                "interrupt below priority threshold dropped"
            );
            self.refresh_interrupt(env);
            NO_IRQ
        }
    }

    /// Completes the innermost interrupt in service.
    ///
    /// Out-of-order completion is refused and logged; on success the source re-latches from
    /// its raw level, so a still-asserted level-triggered source is pending again.
    pub fn complete_handling_interrupt(
        &mut self,
        env: &mut ContextEnv<'_>,
        irq: u32,
    ) -> Result<(), ProtocolError> {
        if let Err(err) = self.active_interrupts.pop_if_top_is(irq) {
            warn!(context = self.id, %err, "refusing interrupt completion");
            return Err(err);
        }

        if let Some(source) = env.sources.get_mut(irq) {
            source.relatch();
        }
        trace!(context = self.id, irq, "interrupt completed");
        self.refresh_interrupt(env);
        Ok(())
    }

    /// Whether this context's line should currently be asserted.
    pub fn line_level(&self, sources: &IrqSources, forced_context: Option<u32>) -> bool {
        if self.forced_elsewhere(forced_context) {
            return false;
        }

        let service_priority = self
            .active_interrupts
            .top()
            .and_then(|irq| sources.get(irq))
            .map_or(0, |source| source.priority());

        self.enabled_sources
            .iter()
            .filter_map(|&irq| sources.get(irq))
            .any(|source| source.is_pending() && source.priority() > service_priority)
    }

    pub fn refresh_interrupt(&self, env: &mut ContextEnv<'_>) {
        let asserted = self.line_level(env.sources, env.forced_context);
        env.lines.set_line(self.id, asserted);
    }

    pub fn save_state(&self) -> IrqContextState {
        IrqContextState {
            id: self.id,
            priority_threshold: self.priority_threshold,
            enabled_sources: self.enabled_sources().collect(),
            active_interrupts: self.active_interrupts.iter().collect(),
        }
    }

    pub(crate) fn restore(&mut self, state: &IrqContextState) {
        self.priority_threshold = state.priority_threshold;
        self.enabled_sources = state.enabled_sources.iter().copied().collect();
        self.active_interrupts.clear();
        for &irq in &state.active_interrupts {
            self.active_interrupts.push(irq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IrqSource;

    /// Line sink that records every refresh.
    #[derive(Default)]
    struct LineSpy {
        writes: Vec<(u32, bool)>,
    }

    impl IrqLineSink for LineSpy {
        fn set_line(&mut self, context: u32, asserted: bool) {
            self.writes.push((context, asserted));
        }
    }

    impl LineSpy {
        fn level(&self, context: u32) -> Option<bool> {
            self.writes
                .iter()
                .rev()
                .find(|(ctx, _)| *ctx == context)
                .map(|&(_, level)| level)
        }
    }

    fn sources(priorities: &[(u32, u32)]) -> IrqSources {
        let mut sources = IrqSources::new();
        for &(id, priority) in priorities {
            sources.insert(IrqSource::new(id, priority));
        }
        sources
    }

    fn raise(sources: &mut IrqSources, irq: u32) {
        sources.get_mut(irq).unwrap().set_level(true);
    }

    #[test]
    fn equal_priorities_resolve_to_lowest_id() {
        let mut sources = sources(&[(5, 3), (2, 3)]);
        let mut lines = LineSpy::default();
        let mut ctx = IrqContext::new(0);
        {
            let mut env = ContextEnv {
                sources: &mut sources,
                forced_context: None,
                lines: &mut lines,
            };
            ctx.enable_source(&mut env, 5, true);
            ctx.enable_source(&mut env, 2, true);
        }
        raise(&mut sources, 5);
        raise(&mut sources, 2);

        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        assert_eq!(ctx.acknowledge_pending_interrupt(&mut env), 2);
    }

    #[test]
    fn highest_priority_wins_over_lower_id() {
        let mut sources = sources(&[(1, 2), (9, 7)]);
        raise(&mut sources, 1);
        raise(&mut sources, 9);
        let mut lines = LineSpy::default();
        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        let mut ctx = IrqContext::new(0);
        ctx.enable_source(&mut env, 1, true);
        ctx.enable_source(&mut env, 9, true);

        assert_eq!(ctx.acknowledge_pending_interrupt(&mut env), 9);
        assert_eq!(ctx.active_interrupts().top(), Some(9));
        assert!(!env.sources.get(9).unwrap().is_pending());
    }

    #[test]
    fn disabled_sources_are_ignored() {
        let mut sources = sources(&[(1, 2)]);
        raise(&mut sources, 1);
        let mut lines = LineSpy::default();
        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        let mut ctx = IrqContext::new(0);
        ctx.refresh_interrupt(&mut env);
        assert_eq!(ctx.acknowledge_pending_interrupt(&mut env), NO_IRQ);
        assert!(env.sources.get(1).unwrap().is_pending());
        assert_eq!(lines.level(0), Some(false));
    }

    #[test]
    fn unchanged_threshold_does_not_refresh() {
        let mut sources = sources(&[(1, 2)]);
        let mut lines = LineSpy::default();
        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        let mut ctx = IrqContext::new(0);
        ctx.enable_source(&mut env, 1, true);
        let writes = lines.writes.len();

        ctx.set_priority_threshold(0);
        ctx.set_priority_threshold(4);
        assert_eq!(ctx.priority_threshold(), 4);
        assert_eq!(lines.writes.len(), writes);
    }

    #[test]
    fn enable_source_always_refreshes() {
        let mut sources = sources(&[(1, 2)]);
        raise(&mut sources, 1);
        let mut lines = LineSpy::default();
        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        let mut ctx = IrqContext::new(3);

        ctx.enable_source(&mut env, 1, true);
        ctx.enable_source(&mut env, 1, true);
        ctx.enable_source(&mut env, 1, false);
        assert_eq!(lines.writes, vec![(3, true), (3, true), (3, false)]);
    }

    #[test]
    fn reset_clears_enables_and_service_stack() {
        let mut sources = sources(&[(1, 2)]);
        raise(&mut sources, 1);
        let mut lines = LineSpy::default();
        let mut env = ContextEnv {
            sources: &mut sources,
            forced_context: None,
            lines: &mut lines,
        };
        let mut ctx = IrqContext::new(0);
        ctx.enable_source(&mut env, 1, true);
        ctx.set_priority_threshold(2);
        assert_eq!(ctx.acknowledge_pending_interrupt(&mut env), 1);

        ctx.reset(&mut env);
        assert_eq!(ctx.priority_threshold(), 0);
        assert!(ctx.active_interrupts().is_empty());
        assert!(!ctx.is_enabled(1));
        assert_eq!(lines.level(0), Some(false));
    }
}
