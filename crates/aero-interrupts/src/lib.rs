//! Platform-level interrupt arbitration.
//!
//! An [`InterruptController`] owns a table of level-triggered [`IrqSource`]s and one
//! [`IrqContext`] per interrupt target. Each context selects the highest-priority enabled
//! pending source, tracks acknowledged interrupts on a strictly nested [`ServiceStack`] and
//! drives one output line through an [`IrqLineSink`].
//!
//! Source id [`NO_IRQ`] (0) is reserved: acknowledges return it when nothing is claimable.
#![forbid(unsafe_code)]

mod context;
mod controller;
mod error;
mod source;
mod stack;

pub use context::{ContextEnv, IrqContext, IrqContextState, IrqLineSink};
pub use controller::{InterruptController, InterruptControllerConfig, InterruptControllerState};
pub use error::{InterruptStateError, ProtocolError};
pub use source::{IrqSource, IrqSources, NO_IRQ};
pub use stack::ServiceStack;
