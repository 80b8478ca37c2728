use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlackError {
    #[error("No Slack token configured")]
    MissingToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Slack API error on {method}: {error}")]
    Api { method: String, error: String },

    #[error("Rate limited on {method} (retry after {retry_after_secs}s)")]
    RateLimited {
        method: String,
        retry_after_secs: u64,
    },

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type SlackResult<T> = Result<T, SlackError>;
