use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedFormat {
    XmlFeed,
    JsonFeed,
}

/// A single entry of a decoded feed.
///
/// `raw_content_body` is the untouched HTML body; turning it into display
/// blocks is left to downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub description: Option<String>,
    pub raw_content_body: Option<String>,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A decoded feed at a point in time. Never mutated after decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub format: FeedFormat,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub items: Vec<Item>,
}
