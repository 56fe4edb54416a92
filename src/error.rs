// src/error.rs
use thiserror::Error;

/// Every way a voting operation can fail. All variants are expected
/// outcomes and are reported to callers as `{success: false, message}`.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Poll not found: {0}")]
    PollNotFound(String),

    #[error("Option {option_id} does not belong to poll {poll_id}")]
    OptionNotFound { poll_id: String, option_id: String },

    #[error("Error: This IP has already voted on this poll.")]
    AlreadyVoted { poll_id: String, identity: String },

    #[error("No active vote found for this IP.")]
    NoActiveVote { poll_id: String, identity: String },

    #[error("Integrity fault: {identity} held {active} active votes on poll {poll_id}; released {released_vote}")]
    IntegrityFault {
        poll_id: String,
        identity: String,
        active: usize,
        released_vote: uuid::Uuid,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for VoteError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

pub type VoteResult<T> = Result<T, VoteError>;
