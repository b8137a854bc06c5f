use thiserror::Error;

use crate::parser::classify::Evidence;

/// A page could not be retrieved. Always local to one unit of work.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("giving up on {url} after {attempts} attempts ({last})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

/// Why a product link produced no record.
#[derive(Debug, Error)]
pub enum ProductSkip {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("rejected by classifier: {0}")]
    Rejected(Evidence),
}
