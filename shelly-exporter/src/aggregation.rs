//! Full-scrape aggregation: live static targets plus saved targets.

use std::collections::BTreeMap;

use futures::future::join_all;
use parking_lot::RwLock;
use shelly_common::MetricSet;
use tracing::{debug, warn};

use crate::probe::{ProbeErrorKind, ProbeExecutor};

/// Exporter self-observability counters.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// `/metrics` scrapes served.
    pub scrapes_total: u64,
    /// Static targets omitted from a scrape, by failure reason.
    pub omitted: BTreeMap<ProbeErrorKind, u64>,
    /// Saved probes whose durable write failed.
    pub store_write_failures: u64,
    /// Saved targets at the last scrape.
    pub saved_targets: usize,
    pub static_targets: usize,
}

/// Answers `/metrics` scrapes.
///
/// Static targets are probed live on every scrape. Saved entries are only
/// used for targets outside the static list; a static target whose live
/// probe fails is omitted, never replaced by its saved entry.
pub struct Aggregator {
    executor: ProbeExecutor,
    stats: RwLock<ExporterStats>,
}

impl Aggregator {
    pub fn new(executor: ProbeExecutor) -> Self {
        let stats = ExporterStats {
            static_targets: executor.resolver().static_targets().len(),
            saved_targets: executor.store().len(),
            ..Default::default()
        };
        Self {
            executor,
            stats: RwLock::new(stats),
        }
    }

    pub fn executor(&self) -> &ProbeExecutor {
        &self.executor
    }

    /// Collect every metric set for one scrape.
    ///
    /// Output order: static successes in configuration order, then saved
    /// non-static targets sorted by target.
    pub async fn collect(&self) -> Vec<MetricSet> {
        // Snapshot first; saves landing during the probes are not visible
        let saved = self.executor.store().load_all();
        let resolver = self.executor.resolver();
        let static_targets = resolver.static_targets();

        let probes = static_targets.iter().map(|target| {
            let config = resolver.resolve(target);
            async move { self.executor.probe_with(target, &config).await }
        });
        let results = join_all(probes).await;

        let mut sets = Vec::with_capacity(results.len() + saved.len());
        let mut omitted: BTreeMap<ProbeErrorKind, u64> = BTreeMap::new();
        for result in results {
            match result {
                Ok(set) => sets.push(set),
                Err(failure) => {
                    warn!(
                        target = %failure.target,
                        reason = failure.kind.reason(),
                        error = %failure.message,
                        "Static target omitted from scrape"
                    );
                    *omitted.entry(failure.kind).or_default() += 1;
                }
            }
        }

        let mut pushed: Vec<_> = saved
            .into_iter()
            .filter(|(target, _)| !resolver.is_static(target))
            .collect();
        pushed.sort_by(|a, b| a.0.cmp(&b.0));
        let saved_count = pushed.len();
        sets.extend(pushed.into_iter().map(|(_, set)| set));

        {
            let mut stats = self.stats.write();
            stats.scrapes_total += 1;
            stats.saved_targets = self.executor.store().len();
            for (kind, count) in &omitted {
                *stats.omitted.entry(*kind).or_default() += count;
            }
        }

        debug!(
            static_ok = sets.len() - saved_count,
            static_omitted = omitted.values().sum::<u64>(),
            saved = saved_count,
            "Scrape aggregated"
        );
        sets
    }

    pub fn record_store_failure(&self) {
        self.stats.write().store_write_failures += 1;
    }

    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeviceError;
    use crate::config::TargetOverride;
    use crate::devices::IDENTITY;
    use crate::probe::tests::{MockClient, config, executor_with};
    use crate::resolver::{RequestCredentials, TargetResolver};
    use crate::store::{MemoryBackend, SavedDocument, StorageBackend};
    use crate::target::Target;
    use serde_json::json;
    use shelly_common::MetricSample;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn target(s: &str) -> Target {
        Target::parse(s).unwrap()
    }

    fn resolver(static_targets: &[&str], timeout: Duration) -> TargetResolver {
        TargetResolver::new(
            config(timeout),
            static_targets
                .iter()
                .map(|t| (target(t), TargetOverride::default()))
                .collect(),
            HashMap::new(),
        )
        .unwrap()
    }

    fn saved_backend(targets: &[&str]) -> Arc<dyn StorageBackend> {
        let doc = SavedDocument {
            version: 1,
            targets: targets
                .iter()
                .map(|t| {
                    let set = MetricSet::new(
                        *t,
                        "SHHT-1",
                        vec![MetricSample::gauge("temperature", 20.0).with_label("name", *t)],
                    );
                    (t.to_string(), set)
                })
                .collect(),
        };
        Arc::new(MemoryBackend::with_document(serde_json::to_vec(&doc).unwrap()))
    }

    #[tokio::test]
    async fn test_static_failure_drops_saved_entry() {
        let client = MockClient::new()
            .fail("10.0.0.5", IDENTITY, DeviceError::Transport("unreachable".into()));
        let exec = executor_with(
            client,
            resolver(&["10.0.0.5"], Duration::from_secs(1)),
            saved_backend(&["10.0.0.5"]),
        )
        .await;
        let aggregator = Aggregator::new(exec);

        let sets = aggregator.collect().await;
        assert!(sets.iter().all(|s| s.target != "10.0.0.5"));
        assert!(sets.is_empty());

        let stats = aggregator.stats();
        assert_eq!(stats.omitted[&ProbeErrorKind::Transport], 1);
        assert_eq!(stats.scrapes_total, 1);
    }

    #[tokio::test]
    async fn test_static_success_wins_over_saved() {
        let exec = executor_with(
            MockClient::new().plug("10.0.0.5"),
            resolver(&["10.0.0.5"], Duration::from_secs(1)),
            saved_backend(&["10.0.0.5"]),
        )
        .await;
        let sets = Aggregator::new(exec).collect().await;

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].device_type, "SHPLG-S");
        assert!(sets[0].find("temperature").is_none());
    }

    #[tokio::test]
    async fn test_saved_non_static_included_after_static() {
        let exec = executor_with(
            MockClient::new().plug("10.0.0.1"),
            resolver(&["10.0.0.1"], Duration::from_secs(1)),
            saved_backend(&["10.0.0.30", "10.0.0.20"]),
        )
        .await;
        let sets = Aggregator::new(exec).collect().await;

        let targets: Vec<_> = sets.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, ["10.0.0.1", "10.0.0.20", "10.0.0.30"]);
    }

    #[tokio::test]
    async fn test_probe_save_visible_in_next_scrape() {
        let exec = executor_with(
            MockClient::new().plug("10.0.0.7"),
            resolver(&[], Duration::from_secs(1)),
            Arc::new(MemoryBackend::new()),
        )
        .await;
        let aggregator = Aggregator::new(exec);
        assert!(aggregator.collect().await.is_empty());

        aggregator
            .executor()
            .probe("10.0.0.7", &RequestCredentials::default(), true)
            .await
            .unwrap();

        let sets = aggregator.collect().await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, "10.0.0.7");
        assert_eq!(aggregator.stats().saved_targets, 1);
    }

    #[tokio::test]
    async fn test_static_probes_run_concurrently() {
        let targets = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
        let client = targets
            .iter()
            .fold(MockClient::new(), |client, t| client.plug(t))
            .delayed(Duration::from_millis(300));
        let exec = executor_with(
            client,
            resolver(&targets, Duration::from_secs(5)),
            Arc::new(MemoryBackend::new()),
        )
        .await;

        let started = Instant::now();
        let sets = Aggregator::new(exec).collect().await;

        assert_eq!(sets.len(), 4);
        // Three sequential requests per plug; serial probing would take 3.6s
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_slow_target_does_not_hold_back_others() {
        let client = MockClient::new()
            .plug("10.0.0.1")
            .plug("10.0.0.2")
            .delayed(Duration::from_millis(50));
        let resolver = TargetResolver::new(
            config(Duration::from_secs(1)),
            vec![
                (target("10.0.0.1"), TargetOverride::default()),
                (
                    target("10.0.0.2"),
                    TargetOverride {
                        timeout: Some(0.01),
                        ..Default::default()
                    },
                ),
            ],
            HashMap::new(),
        )
        .unwrap();
        let exec = executor_with(client, resolver, Arc::new(MemoryBackend::new())).await;
        let aggregator = Aggregator::new(exec);

        let sets = aggregator.collect().await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, "10.0.0.1");
        assert_eq!(aggregator.stats().omitted[&ProbeErrorKind::Timeout], 1);
    }

    #[tokio::test]
    async fn test_concurrent_saves_and_scrapes_keep_store_consistent() {
        const PUSHED: usize = 16;

        // Each pushed plug reports its index as power draw
        let pushed: Vec<String> = (1..=PUSHED).map(|i| format!("10.0.2.{}", i)).collect();
        let client = pushed
            .iter()
            .enumerate()
            .fold(MockClient::new().plug("10.0.0.1"), |client, (i, t)| {
                client
                    .respond(t, IDENTITY, json!({"type": "SHPLG-S"}))
                    .respond(
                        t,
                        "/status",
                        json!({"meters": [{"power": (i + 1) as f64, "is_valid": true}]}),
                    )
                    .respond(t, "/settings", json!({}))
            })
            .delayed(Duration::from_millis(5));
        let backend = Arc::new(MemoryBackend::new());
        let exec = executor_with(
            client,
            resolver(&["10.0.0.1"], Duration::from_secs(5)),
            backend.clone(),
        )
        .await;
        let aggregator = Arc::new(Aggregator::new(exec));

        let power_matches = |set: &MetricSet| {
            let index: f64 = set.target.rsplit('.').next().unwrap().parse().unwrap();
            set.find("meter_power").map(|s| s.value) == Some(index)
        };

        let saves: Vec<_> = pushed
            .iter()
            .map(|t| {
                let executor = aggregator.executor().clone();
                let t = t.clone();
                tokio::spawn(async move {
                    executor
                        .probe(&t, &RequestCredentials::default(), true)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let scrapes: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    let mut seen = 0;
                    for _ in 0..4 {
                        let sets = aggregator.collect().await;
                        assert_eq!(sets[0].target, "10.0.0.1");

                        let saved = &sets[1..];
                        assert!(saved.len() >= seen, "saved entries never disappear");
                        assert!(saved.windows(2).all(|w| w[0].target < w[1].target));
                        assert!(saved.iter().all(|set| power_matches(set)));
                        seen = saved.len();
                    }
                })
            })
            .collect();

        for save in saves {
            assert!(save.await.unwrap().storage_warning.is_none());
        }
        for scrape in scrapes {
            scrape.await.unwrap();
        }

        let entries = aggregator.executor().store().load_all();
        assert_eq!(entries.len(), PUSHED);
        assert!(entries.values().all(|set| power_matches(set)));

        let doc: SavedDocument = serde_json::from_slice(&backend.document().unwrap()).unwrap();
        assert_eq!(doc.targets.len(), PUSHED);
        assert!(doc.targets.values().all(|set| power_matches(set)));

        let sets = aggregator.collect().await;
        assert_eq!(sets.len(), PUSHED + 1);
    }
}
