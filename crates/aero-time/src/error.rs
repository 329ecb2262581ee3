use thiserror::Error;

use crate::ClockEntryId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("unknown clock entry {0:?}")]
    UnknownEntry(ClockEntryId),

    #[error("no clock entry named `{0}`")]
    UnknownName(String),

    #[error("clock entry `{0}` is already registered")]
    DuplicateName(String),

    #[error("invalid clock entry: {0}")]
    InvalidEntry(&'static str),
}
