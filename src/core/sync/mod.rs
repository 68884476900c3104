//! Refresh cycles over every registered source.
//!
//! A cycle takes one registry snapshot, resolves each source in its own task
//! (cache first unless forced remote), reconciles drifted titles back into the
//! registry and replaces the visible [`Aggregate`] once the [`PublishBarrier`]
//! releases. Overlapping cycles are allowed; the last one to publish wins.

pub mod aggregate;
pub mod barrier;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::core::cache::FeedCache;
use crate::core::events::{EventBus, SyncEvent};
use crate::core::feed::FeedDecoder;
use crate::core::registry::{RegistryError, SourceRegistry};
use crate::core::storage::{Source, SourceId};

pub use aggregate::{Aggregate, Origin, Outcome, ResolvedFeed};
pub use barrier::{CycleState, PublishBarrier, PublishPolicy};

/// What started a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Startup,
    Manual,
    PullToRefresh,
    Timer,
    SourcesChanged,
    ExternalAdd,
}

impl TriggerKind {
    /// Pull-to-refresh is the only trigger that bypasses the cache.
    pub fn forces_remote(self) -> bool {
        matches!(self, TriggerKind::PullToRefresh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Startup => "startup",
            TriggerKind::Manual => "manual",
            TriggerKind::PullToRefresh => "pull_to_refresh",
            TriggerKind::Timer => "timer",
            TriggerKind::SourcesChanged => "sources_changed",
            TriggerKind::ExternalAdd => "external_add",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub trigger: TriggerKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub decode_calls: usize,
    pub state: CycleState,
}

struct Resolution {
    outcome: Outcome,
    decoded: bool,
}

/// Everything a per-source task needs; cloned into each spawned resolution.
#[derive(Clone)]
struct Resolver {
    registry: SourceRegistry,
    cache: Arc<FeedCache>,
    decoder: Arc<dyn FeedDecoder>,
    events: EventBus,
    ttl: Duration,
}

impl Resolver {
    async fn resolve(self, mut source: Source, force_remote: bool, cycle: u64) -> Resolution {
        if !force_remote {
            if let Some(snapshot) = self.cache.get(&source.id) {
                tracing::debug!(cycle, source_id = %source.id, title = source.display_title(), "cache hit");
                return Resolution {
                    outcome: Outcome::Resolved(ResolvedFeed {
                        source,
                        snapshot,
                        origin: Origin::Cache,
                    }),
                    decoded: false,
                };
            }
        }

        let snapshot = match self.decoder.decode(&source.url).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(cycle, source_id = %source.id, url = %source.url, %error, "failed to resolve source");
                self.events.emit(SyncEvent::SourceFailed {
                    source_id: source.id,
                    reason: error.to_string(),
                });
                return Resolution {
                    outcome: Outcome::Failed(error),
                    decoded: true,
                };
            }
        };
        tracing::info!(cycle, source_id = %source.id, title = %snapshot.title, "loaded remote snapshot");
        self.cache.put(source.id, snapshot.clone(), self.ttl);

        if source.title.as_deref() != Some(snapshot.title.as_str()) {
            match self.registry.rename(source.id, &snapshot.title).await {
                Ok(()) => {
                    tracing::info!(
                        source_id = %source.id,
                        from = source.title.as_deref().unwrap_or(""),
                        to = %snapshot.title,
                        "reconciled source title"
                    );
                    source.title = Some(snapshot.title.clone());
                }
                Err(RegistryError::NotFound(id)) => {
                    tracing::debug!(source_id = %id, "source deleted during cycle");
                    self.cache.clear(&id);
                }
                Err(error) => {
                    tracing::warn!(source_id = %source.id, %error, "title reconciliation deferred to next cycle");
                }
            }
        }

        Resolution {
            outcome: Outcome::Resolved(ResolvedFeed {
                source,
                snapshot,
                origin: Origin::Remote,
            }),
            decoded: true,
        }
    }
}

pub struct SyncOrchestrator {
    resolver: Resolver,
    policy: PublishPolicy,
    published: watch::Sender<Arc<Aggregate>>,
    cycles: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(
        registry: SourceRegistry,
        cache: Arc<FeedCache>,
        decoder: Arc<dyn FeedDecoder>,
        events: EventBus,
        ttl: Duration,
    ) -> Self {
        let (published, _) = watch::channel(Arc::new(Aggregate::default()));
        Self {
            resolver: Resolver {
                registry,
                cache,
                decoder,
                events,
                ttl,
            },
            policy: PublishPolicy::default(),
            published,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Receiver for the published aggregate; sees every later publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Aggregate>> {
        self.published.subscribe()
    }

    pub fn current(&self) -> Arc<Aggregate> {
        self.published.borrow().clone()
    }

    pub async fn refresh(&self, trigger: TriggerKind) -> Result<CycleReport, RegistryError> {
        self.refresh_with(trigger, trigger.forces_remote()).await
    }

    /// Runs one cycle to completion. Per-source failures are contained in the
    /// report; only a registry that cannot be listed is an error.
    pub async fn refresh_with(
        &self,
        trigger: TriggerKind,
        force_remote: bool,
    ) -> Result<CycleReport, RegistryError> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let sources = self.resolver.registry.list().await?.into_sources();
        let total = sources.len();
        tracing::info!(cycle, %trigger, total, force_remote, "refresh cycle started");

        let mut tasks = JoinSet::new();
        for source in sources {
            let resolver = self.resolver.clone();
            tasks.spawn(resolver.resolve(source, force_remote, cycle));
        }

        let mut barrier = PublishBarrier::new(self.policy, total);
        let mut entries = Vec::with_capacity(total);
        let mut decode_calls = 0_usize;
        let mut released = barrier.release_if_empty();
        while let Some(joined) = tasks.join_next().await {
            let success = match joined {
                Ok(resolution) => {
                    if resolution.decoded {
                        decode_calls += 1;
                    }
                    match resolution.outcome {
                        Outcome::Resolved(entry) => {
                            entries.push(entry);
                            true
                        }
                        Outcome::Failed(_) => false,
                    }
                }
                Err(error) => {
                    tracing::error!(cycle, %error, "source resolution task aborted");
                    false
                }
            };
            released |= barrier.record(success);
        }

        let entries = self.drop_removed_sources(cycle, entries).await;
        let state = barrier.state();
        if released {
            self.publish(Aggregate { cycle, entries }, &barrier);
        } else {
            tracing::warn!(
                cycle,
                succeeded = barrier.succeeded(),
                failed = barrier.failed(),
                total,
                "cycle starved; keeping previous aggregate"
            );
        }

        Ok(CycleReport {
            cycle,
            trigger,
            total,
            succeeded: barrier.succeeded(),
            failed: barrier.failed(),
            decode_calls,
            state,
        })
    }

    /// Drops entries whose source was deleted while the cycle ran, along with
    /// the cache entries their resolution re-created.
    async fn drop_removed_sources(&self, cycle: u64, entries: Vec<ResolvedFeed>) -> Vec<ResolvedFeed> {
        let live: HashSet<SourceId> = match self.resolver.registry.list().await {
            Ok(snapshot) => snapshot.all().map(|source| source.id).collect(),
            Err(error) => {
                tracing::warn!(cycle, %error, "could not re-read registry before publish");
                return entries;
            }
        };
        entries
            .into_iter()
            .filter(|entry| {
                let id = entry.source_id();
                if live.contains(&id) {
                    return true;
                }
                self.resolver.cache.clear(&id);
                tracing::debug!(cycle, source_id = %id, "dropped source deleted during cycle");
                false
            })
            .collect()
    }

    fn publish(&self, aggregate: Aggregate, barrier: &PublishBarrier) {
        let cycle = aggregate.cycle;
        let size = aggregate.len();
        self.published.send_replace(Arc::new(aggregate));
        tracing::info!(cycle, size, failed = barrier.failed(), "aggregate published");
        self.resolver.events.emit(SyncEvent::Published {
            cycle,
            succeeded: barrier.succeeded(),
            failed: barrier.failed(),
        });
    }

    /// Starts a cache-first cycle whenever the sources-changed generation
    /// moves. Changes that arrive while a cycle is being spawned collapse into
    /// one follow-up cycle. Diagnostic events on the bus never start a cycle.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut changes = self.resolver.events.watch_sources();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let generation = *changes.borrow_and_update();
                tracing::debug!(generation, "sources changed");
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if let Err(error) = orchestrator.refresh(TriggerKind::SourcesChanged).await {
                        tracing::warn!(%error, "event-triggered refresh failed");
                    }
                });
            }
        })
    }

    /// Runs a `Timer` cycle immediately and then once per `interval`.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(error) = orchestrator.refresh(TriggerKind::Timer).await {
                    tracing::warn!(%error, "periodic refresh failed");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ManualClock;
    use crate::core::feed::testing::ScriptedDecoder;
    use crate::core::events::EVENT_CAPACITY;
    use crate::core::feed::DecodeError;
    use crate::core::registry::tests::memory_registry;
    use chrono::{TimeZone, Utc};

    const CYCLE_TTL: Duration = Duration::from_secs(300);

    struct Harness {
        orchestrator: Arc<SyncOrchestrator>,
        registry: SourceRegistry,
        cache: Arc<FeedCache>,
        decoder: Arc<ScriptedDecoder>,
        clock: Arc<ManualClock>,
        events: EventBus,
    }

    async fn harness(policy: PublishPolicy) -> Harness {
        let registry = memory_registry().await;
        let decoder = Arc::new(ScriptedDecoder::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 24, 10, 0, 0).unwrap(),
        ));
        let cache = Arc::new(FeedCache::new(clock.clone()));
        let events = EventBus::default();
        let orchestrator = SyncOrchestrator::new(
            registry.clone(),
            cache.clone(),
            decoder.clone(),
            events.clone(),
            CYCLE_TTL,
        )
        .with_policy(policy);
        Harness {
            orchestrator: Arc::new(orchestrator),
            registry,
            cache,
            decoder,
            clock,
            events,
        }
    }

    async fn register(harness: &Harness, url: &str, title: &str) -> Source {
        let source = harness.registry.create(url).await.expect("create");
        harness.registry.rename(source.id, title).await.expect("rename");
        harness.registry.get(source.id).await.expect("get")
    }

    #[tokio::test]
    async fn all_success_publishes_every_source_and_reconciles_titles() {
        let h = harness(PublishPolicy::AllTerminal).await;
        for (url, stored, remote) in [
            ("https://a.com/rss", "a.com", "Alpha"),
            ("https://b.com/rss", "Beta", "Beta"),
            ("https://c.com/rss", "c.com", "Gamma"),
        ] {
            register(&h, url, stored).await;
            h.decoder.succeed(url, remote);
        }

        let report = h
            .orchestrator
            .refresh(TriggerKind::Manual)
            .await
            .expect("refresh");

        assert_eq!(report.state, CycleState::Published);
        assert_eq!(report.total, 3);
        assert_eq!(report.decode_calls, 3);
        let published = h.orchestrator.current();
        assert_eq!(published.len(), 3);
        assert_eq!(published.cycle, report.cycle);

        for source in h.registry.list().await.expect("list").all() {
            let entry = published.get(source.id).expect("every source is published");
            assert_eq!(source.title.as_deref(), Some(entry.snapshot.title.as_str()));
            assert_eq!(entry.source.title, source.title);
        }
    }

    #[tokio::test]
    async fn success_only_barrier_starves_on_a_single_failure() {
        let h = harness(PublishPolicy::AllSucceeded).await;
        register(&h, "https://a.com/rss", "A").await;
        register(&h, "https://b.com/rss", "B").await;
        register(&h, "https://c.com/rss", "C").await;
        h.decoder.succeed("https://a.com/rss", "A");
        h.decoder.fail("https://b.com/rss", DecodeError::Network("timed out".into()));
        h.decoder.succeed("https://c.com/rss", "C");
        let mut observer = h.orchestrator.subscribe();

        let report = h
            .orchestrator
            .refresh(TriggerKind::Manual)
            .await
            .expect("refresh");

        assert_eq!(report.succeeded, 2);
        assert_eq!(
            report.state,
            CycleState::Starved {
                succeeded: 2,
                failed: 1
            }
        );
        assert!(!observer.has_changed().expect("sender alive"));
        assert_eq!(observer.borrow_and_update().cycle, 0);
        assert!(h.orchestrator.current().is_empty());
    }

    #[tokio::test]
    async fn terminal_barrier_publishes_partial_results() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://a.com/rss", "A").await;
        let failing = register(&h, "https://b.com/rss", "B").await;
        register(&h, "https://c.com/rss", "C").await;
        h.decoder.succeed("https://a.com/rss", "A");
        h.decoder.fail("https://b.com/rss", DecodeError::Parse("bad xml".into()));
        h.decoder.succeed("https://c.com/rss", "C");

        let report = h
            .orchestrator
            .refresh(TriggerKind::Manual)
            .await
            .expect("refresh");

        assert_eq!(
            report.state,
            CycleState::PartiallyPublished {
                succeeded: 2,
                failed: 1
            }
        );
        let published = h.orchestrator.current();
        assert_eq!(published.len(), 2);
        assert!(published.get(failing.id).is_none());
        let stored = h.registry.get(failing.id).await.expect("failing source kept");
        assert_eq!(stored.title.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn valid_cache_makes_cycle_decode_free_until_ttl_elapses() {
        let h = harness(PublishPolicy::AllTerminal).await;
        for (url, title) in [("https://a.com/rss", "A"), ("https://b.com/rss", "B")] {
            register(&h, url, title).await;
            h.decoder.succeed(url, title);
        }

        let first = h.orchestrator.refresh(TriggerKind::Startup).await.expect("first");
        assert_eq!(first.decode_calls, 2);

        h.clock.advance(CYCLE_TTL - Duration::from_secs(1));
        let cached = h.orchestrator.refresh(TriggerKind::Manual).await.expect("cached");
        assert_eq!(cached.decode_calls, 0);
        assert_eq!(h.decoder.calls(), 2);
        assert!(h
            .orchestrator
            .current()
            .entries
            .iter()
            .all(|entry| entry.origin == Origin::Cache));

        h.clock.advance(Duration::from_secs(2));
        let expired = h.orchestrator.refresh(TriggerKind::Timer).await.expect("expired");
        assert_eq!(expired.decode_calls, 2);
        assert_eq!(h.decoder.calls(), 4);
    }

    #[tokio::test]
    async fn pull_to_refresh_bypasses_valid_cache() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://a.com/rss", "A").await;
        h.decoder.succeed("https://a.com/rss", "A");

        h.orchestrator.refresh(TriggerKind::Manual).await.expect("warm");
        let forced = h
            .orchestrator
            .refresh(TriggerKind::PullToRefresh)
            .await
            .expect("forced");

        assert_eq!(forced.decode_calls, 1);
        assert_eq!(h.decoder.calls(), 2);
    }

    #[tokio::test]
    async fn aggregate_is_in_completion_order() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://slow.com/rss", "Slow").await;
        register(&h, "https://fast.com/rss", "Fast").await;
        h.decoder
            .succeed_after("https://slow.com/rss", "Slow", Duration::from_millis(150));
        h.decoder.succeed("https://fast.com/rss", "Fast");

        h.orchestrator.refresh(TriggerKind::Manual).await.expect("refresh");

        let published = h.orchestrator.current();
        let completion: Vec<&str> = published
            .entries
            .iter()
            .map(|entry| entry.snapshot.title.as_str())
            .collect();
        assert_eq!(completion, vec!["Fast", "Slow"]);
        let display: Vec<&str> = published
            .sorted_by_title()
            .into_iter()
            .map(|entry| entry.snapshot.title.as_str())
            .collect();
        assert_eq!(display, vec!["Fast", "Slow"]);
    }

    #[tokio::test]
    async fn empty_registry_publishes_empty_aggregate() {
        let h = harness(PublishPolicy::AllSucceeded).await;
        let report = h.orchestrator.refresh(TriggerKind::Startup).await.expect("refresh");

        assert_eq!(report.total, 0);
        assert_eq!(report.state, CycleState::Published);
        assert_eq!(h.orchestrator.current().cycle, report.cycle);
    }

    #[tokio::test]
    async fn failed_decode_is_announced_on_the_bus() {
        let h = harness(PublishPolicy::AllTerminal).await;
        let source = register(&h, "https://down.com/rss", "Down").await;
        h.decoder.fail("https://down.com/rss", DecodeError::EmptyTitle);
        let mut events = h.events.subscribe();

        h.orchestrator.refresh(TriggerKind::Manual).await.expect("refresh");

        let first = events.recv().await.expect("event");
        assert_eq!(
            first,
            SyncEvent::SourceFailed {
                source_id: source.id,
                reason: DecodeError::EmptyTitle.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn sources_changed_event_starts_a_cycle() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://a.com/rss", "A").await;
        h.decoder.succeed("https://a.com/rss", "A");
        let mut observer = h.orchestrator.subscribe();
        let listener = h.orchestrator.spawn_event_listener();

        h.events.emit(SyncEvent::SourcesChanged);
        tokio::time::timeout(Duration::from_secs(5), observer.changed())
            .await
            .expect("publish within timeout")
            .expect("sender alive");

        assert_eq!(observer.borrow().len(), 1);
        listener.abort();
    }

    #[tokio::test]
    async fn overlapping_cycles_each_publish() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://a.com/rss", "A").await;
        h.decoder
            .succeed_after("https://a.com/rss", "A", Duration::from_millis(50));

        let (first, second) = tokio::join!(
            h.orchestrator.refresh(TriggerKind::PullToRefresh),
            h.orchestrator.refresh(TriggerKind::PullToRefresh),
        );
        let (first, second) = (first.expect("first"), second.expect("second"));

        assert_ne!(first.cycle, second.cycle);
        assert_eq!(h.decoder.calls(), 2);
        let visible = h.orchestrator.current().cycle;
        assert!(visible == first.cycle || visible == second.cycle);
    }

    #[tokio::test]
    async fn failure_flood_does_not_retrigger_the_listener() {
        let h = harness(PublishPolicy::AllTerminal).await;
        let total = EVENT_CAPACITY + 36;
        for index in 0..total {
            let url = format!("https://down{index}.com/rss");
            register(&h, &url, &format!("Down {index}")).await;
            h.decoder.fail(&url, DecodeError::Network("refused".into()));
        }
        let listener = h.orchestrator.spawn_event_listener();

        let report = h.orchestrator.refresh(TriggerKind::Manual).await.expect("refresh");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(report.failed, total);
        assert_eq!(report.decode_calls, total);
        assert_eq!(h.decoder.calls(), total);
        listener.abort();
    }

    #[tokio::test]
    async fn burst_of_changes_runs_at_most_one_cycle_per_signal() {
        let h = harness(PublishPolicy::AllTerminal).await;
        register(&h, "https://a.com/rss", "A").await;
        h.decoder.succeed("https://a.com/rss", "A");
        let listener = h.orchestrator.spawn_event_listener();

        for _ in 0..3 {
            h.events.emit(SyncEvent::SourcesChanged);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cycles = h.orchestrator.current().cycle;
        assert!((1..=3).contains(&cycles), "ran {cycles} cycles");
        listener.abort();
    }

    #[tokio::test]
    async fn source_deleted_mid_cycle_is_not_published_or_cached() {
        let h = harness(PublishPolicy::AllTerminal).await;
        let kept = register(&h, "https://kept.com/rss", "Kept").await;
        let drifted = register(&h, "https://drift.com/rss", "drift.com").await;
        let stable = register(&h, "https://stable.com/rss", "Stable").await;
        let delay = Duration::from_millis(100);
        h.decoder.succeed("https://kept.com/rss", "Kept");
        h.decoder.succeed_after("https://drift.com/rss", "Drift", delay);
        h.decoder.succeed_after("https://stable.com/rss", "Stable", delay);

        let cycle = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.refresh(TriggerKind::Manual).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.registry.delete(drifted.id).await.expect("delete drifted");
        h.registry.delete(stable.id).await.expect("delete stable");
        let report = cycle.await.expect("task").expect("refresh");

        assert_eq!(report.state, CycleState::Published);
        let published = h.orchestrator.current();
        assert_eq!(published.len(), 1);
        assert!(published.get(kept.id).is_some());
        assert!(h.cache.get(&drifted.id).is_none());
        assert!(h.cache.get(&stable.id).is_none());
        assert_eq!(h.cache.len(), 1);
    }
}
