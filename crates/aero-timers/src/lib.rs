//! Timer device building blocks driven by [`aero_time::ClockSource`].
#![forbid(unsafe_code)]

mod comparing;
mod error;

pub use comparing::{
    ComparingTimer, ComparingTimerConfig, ComparingTimerState, DEFAULT_FREQUENCY_HZ,
};
pub use error::TimerError;
