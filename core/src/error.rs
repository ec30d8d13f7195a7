use thiserror::Error;

use crate::compatibility::Verdict;

/// Failures scoped to a single user's conversation. None of these are fatal.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0}")]
    MalformedInput(String),

    #[error("Unrecognized input")]
    UnknownFlow,

    #[error("No active aquarium is set")]
    NoActiveAquarium,

    #[error("Aquarium {0} not found")]
    UnknownAquarium(i64),

    #[error("Addition blocked: species is incompatible with the current water")]
    Blocked(Verdict),
}
