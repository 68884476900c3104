pub mod fetcher;
pub mod parser;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use fetcher::{fetch_feed_with_retry, FetchError};
use parser::{parse_feed_bytes, FeedParseError};
use types::FeedSnapshot;

/// Why a feed could not be turned into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("feed title is empty")]
    EmptyTitle,
}

impl From<FetchError> for DecodeError {
    fn from(error: FetchError) -> Self {
        DecodeError::Network(error.to_string())
    }
}

impl From<FeedParseError> for DecodeError {
    fn from(error: FeedParseError) -> Self {
        match error {
            FeedParseError::EmptyTitle => DecodeError::EmptyTitle,
            other => DecodeError::Parse(other.to_string()),
        }
    }
}

/// Turns a feed URL into a snapshot. Every call is a single attempt with a
/// single terminal outcome as far as callers are concerned.
#[async_trait]
pub trait FeedDecoder: Send + Sync {
    async fn decode(&self, url: &str) -> Result<FeedSnapshot, DecodeError>;
}

/// Decoder backed by an HTTP client and the XML/JSON feed parser.
#[derive(Debug, Clone)]
pub struct HttpFeedDecoder {
    client: reqwest::Client,
    max_retries: usize,
}

impl HttpFeedDecoder {
    pub fn new(timeout: Duration, max_retries: usize) -> Result<Self, DecodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DecodeError::Network(error.to_string()))?;
        Ok(Self::with_client(client, max_retries))
    }

    pub fn with_client(client: reqwest::Client, max_retries: usize) -> Self {
        Self {
            client,
            max_retries,
        }
    }
}

#[async_trait]
impl FeedDecoder for HttpFeedDecoder {
    async fn decode(&self, url: &str) -> Result<FeedSnapshot, DecodeError> {
        let fetched = fetch_feed_with_retry(&self.client, url, self.max_retries).await?;
        tracing::debug!(
            url,
            content_type = fetched.content_type.as_deref().unwrap_or("unknown"),
            bytes = fetched.body.len(),
            "feed fetched"
        );
        let snapshot = parse_feed_bytes(&fetched.body)?;
        Ok(snapshot)
    }
}
