use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to deserialize API response: {0}")]
    Deserialization(String),

    #[error("Feed returned an error for {symbol}: {code}: {description}")]
    FeedError {
        symbol: String,
        code: String,
        description: String,
    },

    #[error("Invalid data in API response: {0}")]
    InvalidData(String),
}
