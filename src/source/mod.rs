//! Upstream publishers of feed messages.

pub mod client;
pub mod error;

use std::future::Future;

pub use client::HttpFeedSource;
pub use error::{Error, SourceResult};

use crate::gtfs::structure::realtime::FeedMessage;
use crate::state::key::SourceId;

/// Delivers decoded messages from one upstream publisher.
pub trait FeedSource: Send + Sync {
    fn id(&self) -> &SourceId;

    fn fetch(&self) -> impl Future<Output = SourceResult<FeedMessage>> + Send;
}
