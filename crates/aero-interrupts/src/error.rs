use thiserror::Error;

/// A completion that does not match the context's service stack.
///
/// These are guest/driver bugs rather than emulator failures: the context refuses the
/// operation, leaves its state untouched and keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("completion of irq {irq} with no interrupt in service")]
    NothingActive { irq: u32 },

    #[error("completion of irq {irq} while irq {top} is in service")]
    NotTopOfStack { irq: u32, top: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterruptStateError {
    #[error("snapshot source table does not match the controller")]
    SourceMismatch,

    #[error("snapshot has {found} contexts, controller has {expected}")]
    ContextCount { expected: usize, found: usize },

    #[error("context {context} references unknown irq {irq}")]
    UnknownSource { context: u32, irq: u32 },
}
