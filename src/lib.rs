//! Keeps a set of subscribed feed sources up to date.
//!
//! [`FeedSync`] wires the durable source registry, the TTL feed cache, the
//! refresh orchestrator and the add/delete/pin lifecycle together. Refresh
//! cycles are started by explicit triggers, by the periodic timer and by
//! `SourcesChanged` events on the [`EventBus`].

pub mod config;
pub mod core;
pub mod error;
pub mod telemetry;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub use crate::config::AppConfig;
pub use crate::core::cache::{FeedCache, SystemClock};
pub use crate::core::events::{EventBus, SyncEvent};
pub use crate::core::feed::types::{FeedSnapshot, Item};
pub use crate::core::feed::{DecodeError, FeedDecoder, HttpFeedDecoder};
pub use crate::core::importer::ImportFormat;
pub use crate::core::registry::{RegistrySnapshot, SourceRegistry};
pub use crate::core::storage::{Source, SourceId};
pub use crate::core::subscription::{ImportReport, LifecycleError, SourceLifecycleManager};
pub use crate::core::sync::{Aggregate, CycleReport, CycleState, PublishPolicy, SyncOrchestrator, TriggerKind};
pub use crate::error::AppError;

use crate::core::storage::SourceRepository;

pub struct FeedSync {
    config: AppConfig,
    repository: SourceRepository,
    registry: SourceRegistry,
    cache: Arc<FeedCache>,
    events: EventBus,
    orchestrator: Arc<SyncOrchestrator>,
    lifecycle: SourceLifecycleManager,
    background: Vec<JoinHandle<()>>,
}

impl FeedSync {
    /// Starts with the HTTP decoder built from `config`.
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        let decoder = HttpFeedDecoder::new(config.http_timeout, config.max_retries)?;
        Self::start_with_decoder(config, Arc::new(decoder)).await
    }

    pub async fn start_with_decoder(
        config: AppConfig,
        decoder: Arc<dyn FeedDecoder>,
    ) -> Result<Self, AppError> {
        let repository = SourceRepository::connect(&config.database_url).await?;
        let registry = SourceRegistry::spawn(repository.clone());
        let cache = Arc::new(match &config.cache_path {
            Some(path) => FeedCache::load_from_file(path, Arc::new(SystemClock))?,
            None => FeedCache::default(),
        });
        let events = EventBus::default();

        let orchestrator = Arc::new(SyncOrchestrator::new(
            registry.clone(),
            cache.clone(),
            decoder.clone(),
            events.clone(),
            config.cycle_ttl,
        ));
        let lifecycle = SourceLifecycleManager::new(
            registry.clone(),
            cache.clone(),
            decoder,
            events.clone(),
            config.add_ttl,
        );
        let listener = orchestrator.spawn_event_listener();
        tracing::info!(database_url = %config.database_url, "feed sync started");

        Ok(Self {
            config,
            repository,
            registry,
            cache,
            events,
            orchestrator,
            lifecycle,
            background: vec![listener],
        })
    }

    /// Starts the timer trigger using the configured interval.
    pub fn spawn_periodic_sync(&mut self) {
        let handle = self.orchestrator.spawn_periodic(self.config.sync_interval);
        self.background.push(handle);
    }

    pub async fn refresh(&self, trigger: TriggerKind) -> Result<CycleReport, AppError> {
        Ok(self.orchestrator.refresh(trigger).await?)
    }

    pub async fn add(&self, url: &str) -> Result<Source, AppError> {
        Ok(self.lifecycle.add(url).await?)
    }

    pub async fn add_from_link(&self, link: &str) -> Result<Source, AppError> {
        Ok(self.lifecycle.add_from_link(link).await?)
    }

    pub async fn delete(&self, id: SourceId) -> Result<(), AppError> {
        Ok(self.lifecycle.delete(id).await?)
    }

    pub async fn set_pinned(&self, id: SourceId, is_pinned: bool) -> Result<(), AppError> {
        Ok(self.lifecycle.set_pinned(id, is_pinned).await?)
    }

    /// `format` accepts `opml`/`xml`, `urls`/`url_list`/`txt` and `json`/`json_list`.
    pub async fn import(&self, format: &str, content: &str) -> Result<ImportReport, AppError> {
        let format: ImportFormat = format.parse()?;
        Ok(self.lifecycle.import(format, content).await?)
    }

    pub async fn sources(&self) -> Result<RegistrySnapshot, AppError> {
        Ok(self.registry.list().await?)
    }

    /// Broadcasts `SourcesChanged` to every listening orchestrator.
    pub fn notify_sources_changed(&self) {
        self.events.emit(SyncEvent::SourcesChanged);
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Aggregate>> {
        self.orchestrator.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Arc<Aggregate> {
        self.orchestrator.current()
    }

    /// Stops background triggers, writes the cache file if one is configured
    /// and closes the database.
    pub async fn shutdown(self) -> Result<(), AppError> {
        for handle in &self.background {
            handle.abort();
        }
        if let Some(path) = &self.config.cache_path {
            self.cache.save_to_file(path)?;
            tracing::info!(path = %path.display(), entries = self.cache.len(), "cache saved");
        }
        self.repository.close().await;
        Ok(())
    }
}
