//! Add, delete and pin operations that keep the registry and the cache in step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;

use crate::core::cache::FeedCache;
use crate::core::events::{EventBus, SyncEvent};
use crate::core::feed::{DecodeError, FeedDecoder};
use crate::core::importer::{build_import_preview, normalize_url, parse_candidates, ImportError, ImportFormat};
use crate::core::registry::{RegistryError, SourceRegistry};
use crate::core::storage::{Source, SourceId};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("could not decode feed: {0}")]
    Decode(#[from] DecodeError),
    #[error("source already exists: {0}")]
    DuplicateSource(String),
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LifecycleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LifecycleError::Registry(RegistryError::NotFound(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub added: Vec<Source>,
    pub duplicates: Vec<String>,
    pub failed: Vec<ImportFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub feed_url: String,
    /// Name the import payload gave the feed, for reporting a feed that never decoded.
    pub title_hint: Option<String>,
    pub reason: String,
}

pub struct SourceLifecycleManager {
    registry: SourceRegistry,
    cache: Arc<FeedCache>,
    decoder: Arc<dyn FeedDecoder>,
    events: EventBus,
    add_ttl: Duration,
}

impl SourceLifecycleManager {
    pub fn new(
        registry: SourceRegistry,
        cache: Arc<FeedCache>,
        decoder: Arc<dyn FeedDecoder>,
        events: EventBus,
        add_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            decoder,
            events,
            add_ttl,
        }
    }

    /// Decodes `url` once, registers it under the decoded title and asks
    /// observers to resync.
    pub async fn add(&self, url: &str) -> Result<Source, LifecycleError> {
        let source = self.register(url).await?;
        self.events.emit(SyncEvent::SourcesChanged);
        Ok(source)
    }

    /// Adds a feed handed over out of band, either as a plain feed URL or as a
    /// link carrying it in a `url` query parameter.
    pub async fn add_from_link(&self, link: &str) -> Result<Source, LifecycleError> {
        let url = feed_url_from_link(link)?;
        tracing::info!(link, url = %url, "external add requested");
        self.add(&url).await
    }

    /// Removes the source and its cache entry. A missing source still has its
    /// cache entry cleared before `NotFound` is reported.
    pub async fn delete(&self, id: SourceId) -> Result<(), LifecycleError> {
        let removed = self.registry.delete(id).await;
        let cleared = self.cache.clear(&id);
        tracing::info!(source_id = %id, cleared, "source deleted");
        removed?;
        self.events.emit(SyncEvent::SourcesChanged);
        Ok(())
    }

    pub async fn set_pinned(&self, id: SourceId, is_pinned: bool) -> Result<(), LifecycleError> {
        self.registry.set_pinned(id, is_pinned).await?;
        tracing::debug!(source_id = %id, is_pinned, "source pin updated");
        Ok(())
    }

    /// Adds every new feed in an import payload, then signals one resync.
    pub async fn import(&self, format: ImportFormat, content: &str) -> Result<ImportReport, LifecycleError> {
        let candidates = parse_candidates(format, content)?;
        let existing: HashSet<String> = self
            .registry
            .list()
            .await?
            .all()
            .map(|source| normalize_url(&source.url))
            .collect();
        let preview = build_import_preview(candidates, &existing);

        let mut report = ImportReport {
            duplicates: preview
                .duplicate_sources
                .into_iter()
                .map(|candidate| candidate.feed_url)
                .collect(),
            ..ImportReport::default()
        };
        for candidate in preview.new_sources {
            match self.register(&candidate.feed_url).await {
                Ok(source) => report.added.push(source),
                Err(LifecycleError::DuplicateSource(_)) => report.duplicates.push(candidate.feed_url),
                Err(error) => {
                    tracing::warn!(
                        url = %candidate.feed_url,
                        title_hint = candidate.title_hint.as_deref().unwrap_or(""),
                        %error,
                        "import candidate not added"
                    );
                    report.failed.push(ImportFailure {
                        feed_url: candidate.feed_url,
                        title_hint: candidate.title_hint,
                        reason: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            added = report.added.len(),
            duplicates = report.duplicates.len(),
            failed = report.failed.len(),
            "import finished"
        );
        if !report.added.is_empty() {
            self.events.emit(SyncEvent::SourcesChanged);
        }
        Ok(report)
    }

    async fn register(&self, url: &str) -> Result<Source, LifecycleError> {
        let url = validate_feed_url(url)?;
        let snapshot = self.decoder.decode(&url).await?;
        let title = snapshot.title.trim().to_string();
        if title.is_empty() {
            return Err(DecodeError::EmptyTitle.into());
        }

        let source = match self.registry.register(&url, &title).await {
            Ok(source) => source,
            Err(RegistryError::Duplicate(url)) => {
                tracing::info!(url = %url, title = %title, "rejected duplicate source");
                return Err(LifecycleError::DuplicateSource(url));
            }
            Err(error) => return Err(error.into()),
        };
        self.cache.put(source.id, snapshot, self.add_ttl);
        Ok(source)
    }
}

fn validate_feed_url(raw: &str) -> Result<String, LifecycleError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|error| LifecycleError::InvalidUrl(format!("{trimmed}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LifecycleError::InvalidUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Extracts the feed URL from an external link.
pub fn feed_url_from_link(link: &str) -> Result<String, LifecycleError> {
    let trimmed = link.trim();
    let parsed = Url::parse(trimmed).map_err(|error| LifecycleError::InvalidUrl(format!("{trimmed}: {error}")))?;
    if matches!(parsed.scheme(), "http" | "https") {
        return Ok(trimmed.to_string());
    }
    let payload = parsed
        .query_pairs()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| LifecycleError::InvalidUrl(trimmed.to_string()))?;
    validate_feed_url(&payload)
}
