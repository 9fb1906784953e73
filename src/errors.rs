use std::time::Duration;

use crate::models::Verdict;

/// Failures talking to the event store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected stored value: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    /// Malformed input. Nothing was persisted.
    #[error("invalid play: {0}")]
    Validation(String),

    /// The raw event could not be classified or persisted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event was persisted as a counted play but the track
    /// aggregate was not bumped. The event log stays the source of
    /// truth and reconciliation restores the aggregate.
    #[error("play {} was recorded but the aggregate increment failed: {source}", .verdict.event_id)]
    AggregateIncrement {
        verdict: Verdict,
        #[source]
        source: StoreError,
    },

    #[error("invalid period {0:?}, expected e.g. 12h, 7d, 4w, 1m")]
    InvalidPeriod(String),
}

impl PlayError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PlayError::Validation(msg.into())
    }

    /// The http status this error maps onto
    pub fn status(&self) -> u16 {
        match self {
            PlayError::Validation(_) | PlayError::InvalidPeriod(_) => 400,
            PlayError::Store(_) | PlayError::AggregateIncrement { .. } => 500,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, PlayError>;
