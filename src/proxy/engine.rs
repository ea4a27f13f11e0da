//! Validation engine
//!
//! Runs one protocol batch through a fixed pool of workers. Each worker pulls
//! the next pending candidate, answers it from the probe cache or a fresh
//! probe, and records the verdict in the shared run state. The state is
//! checkpointed every N verdicts and once more when the batch ends.

use crate::proxy::checker::ProxyChecker;
use crate::proxy::failure::FailureKind;
use crate::proxy::models::{ProbeResult, Proxy, ProxyType};
use crate::proxy::probe_cache::ProbeCache;
use crate::proxy::publisher::Publisher;
use crate::proxy::reporter::{BatchReport, ReportSource, Reporter};
use crate::proxy::state::RunState;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    finished: usize,
    working: usize,
    failed: usize,
    cache_hits: usize,
    histogram: BTreeMap<FailureKind, usize>,
}

#[derive(Debug, Default)]
struct Shared {
    state: RunState,
    counters: Counters,
    since_checkpoint: usize,
}

/// Shared bookkeeping of one running batch
struct BatchCoordinator {
    proxy_type: ProxyType,
    shared: Mutex<Shared>,
    /// Serializes checkpoint writes
    checkpoint_lock: tokio::sync::Mutex<()>,
    started: Instant,
    total: usize,
    already_known: usize,
    workers: usize,
    checkpoint_interval: usize,
}

impl BatchCoordinator {
    /// Record a verdict; returns true when a checkpoint is due
    fn complete(&self, result: ProbeResult, from_cache: bool) -> bool {
        let mut shared = self.shared.lock();
        let failure = result.failure.clone();
        let working = result.is_working();

        shared.counters.finished += 1;
        if from_cache {
            shared.counters.cache_hits += 1;
        }
        if shared.state.record(self.proxy_type, result) {
            if working {
                shared.counters.working += 1;
            } else {
                shared.counters.failed += 1;
                let kind =
                    failure.unwrap_or_else(|| FailureKind::Unknown("unspecified".to_string()));
                *shared.counters.histogram.entry(kind).or_default() += 1;
            }
        }

        shared.since_checkpoint += 1;
        if shared.since_checkpoint >= self.checkpoint_interval {
            shared.since_checkpoint = 0;
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> RunState {
        self.shared.lock().state.clone()
    }

    async fn checkpoint(&self, publisher: &Publisher) {
        let _guard = self.checkpoint_lock.lock().await;
        let state = self.snapshot();
        match publisher.checkpoint(&state).await {
            Ok(()) => debug!(protocol = %self.proxy_type, "Checkpoint written"),
            Err(e) => warn!(protocol = %self.proxy_type, error = %e, "Checkpoint failed"),
        }
    }

    fn into_state(self) -> RunState {
        self.shared.into_inner().state
    }
}

impl ReportSource for BatchCoordinator {
    fn report(&self) -> BatchReport {
        let shared = self.shared.lock();
        BatchReport {
            proxy_type: self.proxy_type,
            workers: self.workers,
            elapsed: self.started.elapsed(),
            total: self.total,
            already_known: self.already_known,
            finished: shared.counters.finished,
            working: shared.counters.working,
            failed: shared.counters.failed,
            cache_hits: shared.counters.cache_hits,
            histogram: shared.counters.histogram.clone(),
        }
    }
}

/// Validates candidate batches and keeps the run state current
#[derive(Clone)]
pub struct ValidationEngine {
    checker: ProxyChecker,
    cache: ProbeCache,
    publisher: Publisher,
}

impl ValidationEngine {
    pub fn new(checker: ProxyChecker, cache: ProbeCache, publisher: Publisher) -> Self {
        Self {
            checker,
            cache,
            publisher,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Validate every candidate of `proxy_type` not yet resolved in `state`.
    ///
    /// Verdicts are added to `state`; the final report is returned.
    pub async fn run(
        &self,
        state: &mut RunState,
        proxy_type: ProxyType,
        candidates: &[Proxy],
        own_address: &str,
    ) -> BatchReport {
        let mut seen = HashSet::new();
        let mut already_known = 0;
        let mut pending = Vec::new();
        for proxy in candidates.iter().filter(|p| p.proxy_type == proxy_type) {
            let canonical = proxy.canonical();
            if state.is_known(proxy_type, &canonical) {
                already_known += 1;
            } else if seen.insert(canonical) {
                pending.push(proxy);
            }
        }

        let config = self.checker.config();
        let workers = config.concurrency.max(1).min(pending.len());
        info!(
            protocol = %proxy_type,
            pending = pending.len(),
            already_known,
            workers,
            "Starting validation batch"
        );

        let coordinator = BatchCoordinator {
            proxy_type,
            shared: Mutex::new(Shared {
                state: std::mem::take(state),
                ..Default::default()
            }),
            checkpoint_lock: tokio::sync::Mutex::new(()),
            started: Instant::now(),
            total: pending.len(),
            already_known,
            workers,
            checkpoint_interval: config.checkpoint_interval.max(1),
        };

        if !pending.is_empty() {
            let next = AtomicUsize::new(0);
            let pool = join_all(
                (0..workers).map(|_| self.worker(&coordinator, &pending, &next, own_address)),
            );
            let reporter = Reporter::new(config.report_interval);
            tokio::select! {
                _ = pool => {}
                _ = reporter.run(&coordinator) => {}
            }
        }

        coordinator.checkpoint(&self.publisher).await;
        let report = coordinator.report();
        Reporter::emit(&report);
        *state = coordinator.into_state();
        report
    }

    async fn worker(
        &self,
        coordinator: &BatchCoordinator,
        pending: &[&Proxy],
        next: &AtomicUsize,
        own_address: &str,
    ) {
        loop {
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(proxy) = pending.get(index) else {
                break;
            };

            let (result, from_cache) = self.evaluate(proxy, own_address).await;
            debug!(proxy = %proxy, working = result.is_working(), from_cache, "Verdict");
            if coordinator.complete(result, from_cache) {
                coordinator.checkpoint(&self.publisher).await;
            }
        }
    }

    /// Cached verdict if fresh, else a probe whose verdict is cached
    async fn evaluate(&self, proxy: &Proxy, own_address: &str) -> (ProbeResult, bool) {
        if let Some(cached) = self.cache.lookup(proxy, own_address).await {
            return (cached, true);
        }
        let result = self.checker.check_proxy(proxy, own_address).await;
        if let Err(e) = self.cache.store(proxy, &result).await {
            warn!(proxy = %proxy, error = %e, "Failed to store probe result");
        }
        (result, false)
    }
}
