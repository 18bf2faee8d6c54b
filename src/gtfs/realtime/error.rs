use chrono::{DateTime, Utc};

use crate::state::key::SourceId;

/// Why an entity was skipped.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityDefect {
    #[error("empty id")]
    EmptyId,

    #[error("no payload")]
    MissingPayload,

    #[error("more than one payload")]
    MultiplePayloads,

    #[error("shape payloads are not merged")]
    UnsupportedPayload,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Out of order update from {feed}: {timestamp} is older than {last_applied}")]
    OutOfOrderUpdate {
        feed: SourceId,
        timestamp: DateTime<Utc>,
        last_applied: DateTime<Utc>,
    },

    #[error("Rejected message from {feed}: {timestamp} is too far past ingest time {now}")]
    FutureSkewRejected {
        feed: SourceId,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Rejected message from {feed}: header has no timestamp")]
    MissingTimestamp { feed: SourceId },

    #[error("Malformed entity '{id}': {reason}")]
    MalformedEntity { id: String, reason: EntityDefect },
}

impl Error {
    /// Message-level rejections leave state untouched and are safe to continue past.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::OutOfOrderUpdate { .. }
                | Error::FutureSkewRejected { .. }
                | Error::MissingTimestamp { .. }
        )
    }
}

pub type RtResult<T> = Result<T, Error>;
