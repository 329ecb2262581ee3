use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ContextEnv, InterruptStateError, IrqContext, IrqContextState, IrqSource, IrqSources, NO_IRQ,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptControllerConfig {
    /// Sources get ids `1..=num_sources`.
    pub num_sources: u32,
    /// Contexts get ids `0..num_contexts`.
    pub num_contexts: u32,
    /// Priority every source starts with (and returns to on reset).
    pub default_priority: u32,
}

impl Default for InterruptControllerConfig {
    fn default() -> Self {
        Self {
            num_sources: 31,
            num_contexts: 1,
            default_priority: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptControllerState {
    pub sources: Vec<IrqSource>,
    pub contexts: Vec<IrqContextState>,
    pub forced_context: Option<u32>,
}

/// Platform-level interrupt controller: owns the sources, one [`IrqContext`] per target and
/// the per-context output lines.
///
/// Device models drive source levels with [`Self::set_source_level`]; the CPU side polls
/// [`Self::output_line`] and claims/completes with [`Self::acknowledge`] and
/// [`Self::complete`]. Every change re-arbitrates all contexts, since one source may be
/// enabled in several of them.
#[derive(Debug, Clone)]
pub struct InterruptController {
    config: InterruptControllerConfig,
    sources: IrqSources,
    contexts: Vec<IrqContext>,
    lines: Vec<bool>,
    forced_context: Option<u32>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new(InterruptControllerConfig::default())
    }
}

impl InterruptController {
    pub fn new(config: InterruptControllerConfig) -> Self {
        Self {
            config,
            sources: IrqSources::with_count(config.num_sources, config.default_priority),
            contexts: (0..config.num_contexts).map(IrqContext::new).collect(),
            lines: vec![false; config.num_contexts as usize],
            forced_context: None,
        }
    }

    pub fn config(&self) -> &InterruptControllerConfig {
        &self.config
    }

    pub fn source(&self, irq: u32) -> Option<&IrqSource> {
        self.sources.get(irq)
    }

    pub fn sources(&self) -> &IrqSources {
        &self.sources
    }

    pub fn context(&self, context: u32) -> Option<&IrqContext> {
        self.contexts.get(context as usize)
    }

    pub fn output_line(&self, context: u32) -> bool {
        self.lines.get(context as usize).copied().unwrap_or(false)
    }

    pub fn output_lines(&self) -> &[bool] {
        &self.lines
    }

    /// Returns sources and contexts to their power-on state. The forced context survives.
    pub fn reset(&mut self) {
        let priority = self.config.default_priority;
        for source in self.sources.iter_mut() {
            source.clear(priority);
        }

        let Self {
            sources,
            contexts,
            lines,
            forced_context,
            ..
        } = self;
        let mut env = ContextEnv {
            sources,
            forced_context: *forced_context,
            lines,
        };
        for context in contexts.iter_mut() {
            context.reset(&mut env);
        }
    }

    pub fn refresh_interrupts(&mut self) {
        let Self {
            sources,
            contexts,
            lines,
            forced_context,
            ..
        } = self;
        let mut env = ContextEnv {
            sources,
            forced_context: *forced_context,
            lines,
        };
        for context in contexts.iter() {
            context.refresh_interrupt(&mut env);
        }
    }

    /// Runs `f` against one context, then refreshes every line: sources are shared, so a
    /// claim or completion in one context can change what the others see.
    fn with_context<R>(
        &mut self,
        context: u32,
        f: impl FnOnce(&mut IrqContext, &mut ContextEnv<'_>) -> R,
    ) -> Option<R> {
        let result = {
            let Self {
                sources,
                contexts,
                lines,
                forced_context,
                ..
            } = self;
            let Some(ctx) = contexts.get_mut(context as usize) else {
                warn!(context, "no such interrupt context");
                return None;
            };
            let mut env = ContextEnv {
                sources,
                forced_context: *forced_context,
                lines,
            };
            f(ctx, &mut env)
        };
        self.refresh_interrupts();
        Some(result)
    }

    /// Drives a source's input level (level-triggered: asserting latches it pending).
    pub fn set_source_level(&mut self, irq: u32, level: bool) {
        let Some(source) = self.sources.get_mut(irq) else {
            warn!(irq, level, "level change on unknown irq");
            return;
        };
        source.set_level(level);
        self.refresh_interrupts();
    }

    pub fn set_source_priority(&mut self, irq: u32, priority: u32) {
        let Some(source) = self.sources.get_mut(irq) else {
            warn!(irq, priority, "priority write to unknown irq");
            return;
        };
        source.set_priority(priority);
        self.refresh_interrupts();
    }

    pub fn enable_source(&mut self, context: u32, irq: u32, enabled: bool) {
        if !self.sources.contains(irq) {
            warn!(context, irq, "enable of unknown irq");
            return;
        }
        self.with_context(context, |ctx, env| ctx.enable_source(env, irq, enabled));
    }

    pub fn priority_threshold(&self, context: u32) -> Option<u64> {
        self.context(context).map(IrqContext::priority_threshold)
    }

    pub fn set_priority_threshold(&mut self, context: u32, threshold: u64) {
        if let Some(ctx) = self.contexts.get_mut(context as usize) {
            ctx.set_priority_threshold(threshold);
        } else {
            warn!(context, "no such interrupt context");
        }
    }

    /// Claim: returns the acknowledged irq id, or [`NO_IRQ`].
    pub fn acknowledge(&mut self, context: u32) -> u32 {
        self.with_context(context, |ctx, env| ctx.acknowledge_pending_interrupt(env))
            .unwrap_or(NO_IRQ)
    }

    /// Completion. Protocol violations are logged by the context and otherwise ignored.
    pub fn complete(&mut self, context: u32, irq: u32) {
        if irq == NO_IRQ {
            debug!(context, "ignoring completion of irq 0");
            return;
        }
        if !self.sources.contains(irq) {
            warn!(context, irq, "completion of unknown irq");
            return;
        }
        self.with_context(context, |ctx, env| {
            let _ = ctx.complete_handling_interrupt(env, irq);
        });
    }

    pub fn forced_context(&self) -> Option<u32> {
        self.forced_context
    }

    /// Routes all arbitration to `context` (`None` restores normal routing).
    pub fn set_forced_context(&mut self, context: Option<u32>) {
        if context == self.forced_context {
            return;
        }
        debug!(?context, "forced interrupt context changed");
        self.forced_context = context;
        self.refresh_interrupts();
    }

    pub fn save_state(&self) -> InterruptControllerState {
        InterruptControllerState {
            sources: self.sources.iter().copied().collect(),
            contexts: self.contexts.iter().map(IrqContext::save_state).collect(),
            forced_context: self.forced_context,
        }
    }

    /// Restores a snapshot taken from a controller with the same configuration and
    /// recomputes the output lines.
    pub fn load_state(
        &mut self,
        state: &InterruptControllerState,
    ) -> Result<(), InterruptStateError> {
        let same_sources = state.sources.len() == self.sources.len()
            && state
                .sources
                .iter()
                .all(|source| self.sources.contains(source.id()));
        if !same_sources {
            return Err(InterruptStateError::SourceMismatch);
        }
        if state.contexts.len() != self.contexts.len() {
            return Err(InterruptStateError::ContextCount {
                expected: self.contexts.len(),
                found: state.contexts.len(),
            });
        }
        for context in &state.contexts {
            let unknown = context
                .enabled_sources
                .iter()
                .chain(&context.active_interrupts)
                .find(|&&irq| !self.sources.contains(irq));
            if let Some(&irq) = unknown {
                return Err(InterruptStateError::UnknownSource {
                    context: context.id,
                    irq,
                });
            }
        }

        for &source in &state.sources {
            self.sources.insert(source);
        }
        for (ctx, saved) in self.contexts.iter_mut().zip(&state.contexts) {
            ctx.restore(saved);
        }
        self.forced_context = state.forced_context;
        self.refresh_interrupts();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(num_contexts: u32) -> InterruptController {
        InterruptController::new(InterruptControllerConfig {
            num_sources: 8,
            num_contexts,
            default_priority: 1,
        })
    }

    #[test]
    fn level_triggered_source_repends_after_completion() {
        let mut plic = controller(1);
        plic.enable_source(0, 3, true);

        plic.set_source_level(3, true);
        assert!(plic.output_line(0));
        assert_eq!(plic.acknowledge(0), 3);
        assert!(!plic.output_line(0));

        // Still asserted when the handler finishes.
        plic.complete(0, 3);
        assert!(plic.source(3).unwrap().is_pending());
        assert!(plic.output_line(0));

        assert_eq!(plic.acknowledge(0), 3);
        plic.set_source_level(3, false);
        plic.complete(0, 3);
        assert!(!plic.source(3).unwrap().is_pending());
        assert!(!plic.output_line(0));
    }

    #[test]
    fn shared_source_is_visible_to_every_enabled_context() {
        let mut plic = controller(2);
        plic.enable_source(0, 5, true);
        plic.enable_source(1, 5, true);

        plic.set_source_level(5, true);
        assert_eq!(plic.output_lines(), &[true, true]);

        assert_eq!(plic.acknowledge(1), 5);
        assert_eq!(plic.output_lines(), &[false, false]);
        assert_eq!(plic.acknowledge(0), NO_IRQ);
    }

    #[test]
    fn priority_writes_rearbitrate() {
        let mut plic = controller(1);
        plic.enable_source(0, 2, true);
        plic.set_source_priority(2, 0);
        plic.set_source_level(2, true);
        assert!(!plic.output_line(0));

        plic.set_source_priority(2, 4);
        assert!(plic.output_line(0));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut plic = controller(1);
        plic.set_source_level(99, true);
        plic.enable_source(7, 1, true);
        plic.complete(0, 0);
        assert_eq!(plic.acknowledge(7), NO_IRQ);
        assert_eq!(plic.output_lines(), &[false]);
    }

    #[test]
    fn reset_returns_to_power_on_state() {
        let mut plic = controller(1);
        plic.enable_source(0, 1, true);
        plic.set_source_priority(1, 6);
        plic.set_source_level(1, true);
        plic.set_priority_threshold(0, 2);
        assert_eq!(plic.acknowledge(0), 1);

        plic.reset();
        let source = plic.source(1).unwrap();
        assert_eq!(source.priority(), 1);
        assert!(!source.is_pending());
        assert_eq!(plic.priority_threshold(0), Some(0));
        assert!(plic.context(0).unwrap().active_interrupts().is_empty());
        assert!(!plic.output_line(0));
    }
}
