//! Virtual time and clock-entry scheduling.
//!
//! Every timer model in the emulator counts on **virtual time**: nanoseconds since reset,
//! advanced only by whoever is driving the machine (the CPU loop in production, the test in
//! unit tests). A [`ClockSource`] owns that time axis together with a table of
//! [`ClockEntry`] counters and steps from one match to the next, so a device model sees the
//! same sequence of matches no matter how coarsely time is advanced.
//!
//! Entry owners are notified through [`ClockEntryOwner`]. All mutation of an entry goes
//! through [`ClockSource::exchange_entry`] (or the `&mut ClockEntry` handed to
//! [`ClockEntryOwner::on_match`]) so readers never observe a half-applied update.
#![forbid(unsafe_code)]

mod clock_source;
mod entry;
mod error;

pub use clock_source::{
    ClockEntryId, ClockEntryOwner, ClockEntryState, ClockSource, ClockSourceState,
};
pub use entry::{ClockEntry, Direction, WorkMode};
pub use error::ClockError;
