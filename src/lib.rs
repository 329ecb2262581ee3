//! Timing and interrupt core of the emulator.
//!
//! * [`time`]: virtual time and the [`time::ClockSource`] that schedules counter matches.
//! * [`timers`]: the [`timers::ComparingTimer`] peripheral building block.
//! * [`interrupts`]: the [`interrupts::InterruptController`] and its per-target arbitration.
//!
//! [`route_compare_to_irq`] is the usual glue between the two halves.
#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError};

pub use aero_interrupts as interrupts;
pub use aero_time as time;
pub use aero_timers as timers;

use interrupts::InterruptController;
use timers::ComparingTimer;

/// Latches `irq` pending on `controller` every time `timer` reaches its compare value.
///
/// The line is pulsed (asserted then released), so the interrupt stays pending until a
/// context acknowledges it and does not re-pend on completion.
pub fn route_compare_to_irq(
    timer: &ComparingTimer,
    controller: Arc<Mutex<InterruptController>>,
    irq: u32,
) {
    timer.on_compare_reached(move || {
        let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
        controller.set_source_level(irq, true);
        controller.set_source_level(irq, false);
    });
}
