use crate::ProtocolError;

/// Interrupts a context has acknowledged but not yet completed, innermost last.
///
/// Completion is strictly LIFO: only the innermost interrupt may be popped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStack {
    irqs: Vec<u32>,
}

impl ServiceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, irq: u32) {
        self.irqs.push(irq);
    }

    pub fn top(&self) -> Option<u32> {
        self.irqs.last().copied()
    }

    /// Pops `expected` if it is the innermost interrupt in service.
    pub fn pop_if_top_is(&mut self, expected: u32) -> Result<(), ProtocolError> {
        match self.top() {
            None => Err(ProtocolError::NothingActive { irq: expected }),
            Some(top) if top != expected => Err(ProtocolError::NotTopOfStack {
                irq: expected,
                top,
            }),
            Some(_) => {
                self.irqs.pop();
                Ok(())
            }
        }
    }

    pub fn contains(&self, irq: u32) -> bool {
        self.irqs.contains(&irq)
    }

    pub fn len(&self) -> usize {
        self.irqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.irqs.is_empty()
    }

    pub fn clear(&mut self) {
        self.irqs.clear();
    }

    /// Outermost first.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.irqs.iter().copied()
    }
}
