use serde::Serialize;

use crate::core::feed::types::{FeedSnapshot, Item};
use crate::core::feed::DecodeError;
use crate::core::storage::{Source, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Cache,
    Remote,
}

/// A source together with the snapshot it resolved to in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFeed {
    pub source: Source,
    pub snapshot: FeedSnapshot,
    pub origin: Origin,
}

impl ResolvedFeed {
    pub fn source_id(&self) -> SourceId {
        self.source.id
    }
}

/// Terminal result of resolving one source.
#[derive(Debug, Clone)]
pub enum Outcome {
    Resolved(ResolvedFeed),
    Failed(DecodeError),
}

/// The externally visible feed list. Entries are in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    /// Cycle that published this aggregate; `0` before the first publish.
    pub cycle: u64,
    pub entries: Vec<ResolvedFeed>,
}

impl Aggregate {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: SourceId) -> Option<&ResolvedFeed> {
        self.entries.iter().find(|entry| entry.source.id == id)
    }

    /// Entries ordered by snapshot title for stable display.
    pub fn sorted_by_title(&self) -> Vec<&ResolvedFeed> {
        let mut entries: Vec<&ResolvedFeed> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            a.snapshot
                .title
                .cmp(&b.snapshot.title)
                .then(a.source.id.cmp(&b.source.id))
        });
        entries
    }

    /// Every item across all feeds, newest first; undated items last.
    pub fn timeline(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self
            .entries
            .iter()
            .flat_map(|entry| entry.snapshot.items.iter())
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items
    }
}
