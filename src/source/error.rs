#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid feed url '{url}': {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Deserialize error: {0}")]
    Deserialize(#[from] serde_json::Error),
}

pub type SourceResult<T> = Result<T, Error>;
