use aero_time::ClockError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The timer could not be built from its configuration.
    #[error("compare value {compare} exceeds limit {limit}")]
    Construction { compare: u64, limit: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Clock(#[from] ClockError),
}
