use crate::{cache, config, gtfs, source};

#[derive(thiserror::Error, Debug)]
pub enum FeedStateError {
    #[error("Config error: {0}")]
    Config(#[from] config::Error),

    #[error("Feed source error: {0}")]
    Source(#[from] source::Error),

    #[error("Realtime error: {0}")]
    Realtime(#[from] gtfs::realtime::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::Error),
}

impl From<FeedStateError> for std::io::Error {
    fn from(e: FeedStateError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

pub type FeedStateResult<T> = Result<T, FeedStateError>;
