use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stable identity of a registered source. Never reused for another row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub i64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SourceRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub is_pinned: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A subscribed feed. `title` stays `None` until the feed has been decoded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub url: String,
    pub title: Option<String>,
    pub is_pinned: bool,
    pub created_at: String,
}

impl Source {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

impl From<SourceRecord> for Source {
    fn from(record: SourceRecord) -> Self {
        Self {
            id: SourceId(record.id),
            url: record.url,
            title: record.title,
            is_pinned: record.is_pinned == 1,
            created_at: record.created_at,
        }
    }
}
