//! End-to-end orchestration: collect, deduplicate, export, validate, publish

use crate::proxy::checker::{lookup_own_address, Prober, ProxyChecker};
use crate::proxy::crawler::{ProxyCrawler, ProxySource};
use crate::proxy::dedup::{merge, Merged};
use crate::proxy::engine::ValidationEngine;
use crate::proxy::failure::FailureKind;
use crate::proxy::models::{Proxy, ProxyType};
use crate::proxy::reporter::BatchReport;
use crate::proxy::state::RunState;
use crate::{Config, Result};
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of validating every protocol
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub batches: Vec<BatchReport>,
    pub working: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn probed(&self) -> usize {
        self.batches.iter().map(BatchReport::probed).sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.batches.iter().map(|b| b.cache_hits).sum()
    }

    /// Failure buckets summed over every batch
    pub fn histogram(&self) -> BTreeMap<FailureKind, usize> {
        let mut merged = BTreeMap::new();
        for (kind, count) in self.batches.iter().flat_map(|b| &b.histogram) {
            *merged.entry(kind.clone()).or_default() += count;
        }
        merged
    }

    /// Merged failure buckets, most frequent first
    pub fn histogram_line(&self) -> String {
        BatchReport {
            histogram: self.histogram(),
            ..Default::default()
        }
        .histogram_line()
    }
}

/// Fetch and parse every source, then merge in source order
pub async fn collect_candidates(crawler: &ProxyCrawler, sources: &[ProxySource]) -> Merged {
    let mut all = Vec::new();
    for result in crawler.crawl_sources(sources).await {
        match &result.error {
            Some(error) => warn!(source = %result.source, error = %error, "Source dropped"),
            None => all.extend(result.proxies),
        }
    }

    let merged = merge(all);
    for proxy_type in ProxyType::ALL {
        info!(protocol = %proxy_type, candidates = merged.protocol(proxy_type).len(), "Collected");
    }
    info!(unique = merged.len(), "Deduplicated candidates");
    merged
}

/// Sources from the configured list, or the built-in feeds
pub fn configured_sources(config: &Config) -> Result<Vec<ProxySource>> {
    match &config.sources_file {
        Some(path) => ProxySource::load_list(path),
        None => Ok(ProxyCrawler::get_common_sources()),
    }
}

/// Learn our own public address with a plain, unproxied client
pub async fn own_address(config: &Config) -> Result<String> {
    let client = Client::builder().timeout(Duration::from_secs(20)).build()?;
    let address = lookup_own_address(&client, &config.own_address_url)
        .await
        .map_err(|e| anyhow::anyhow!("cannot determine own public address: {:#}", e))?;
    info!(address = %address, "Own public address");
    Ok(address)
}

/// Validate candidates of every protocol against the saved run state.
///
/// The state is loaded from the output directory, so verdicts of earlier
/// runs are reused and only new candidates get probed.
pub async fn validate(
    config: &Config,
    candidates: &[Proxy],
    own_address: &str,
    prober: Arc<dyn Prober>,
) -> Result<RunSummary> {
    let publisher = config.publisher();
    let engine = ValidationEngine::new(
        ProxyChecker::with_config(config.checker_config(), prober),
        config.probe_cache(),
        publisher.clone(),
    );

    let mut state = RunState::load_or_default(publisher.state_path());
    info!(
        working = state.working_count(),
        failed = state.failed_count(),
        "Loaded run state"
    );

    let mut summary = RunSummary::default();
    for proxy_type in ProxyType::ALL {
        let report = engine.run(&mut state, proxy_type, candidates, own_address).await;
        summary.batches.push(report);
    }

    publisher.finalize(&state).await?;
    summary.working = state.working_count();
    summary.failed = state.failed_count();
    info!(
        working = summary.working,
        failed = summary.failed,
        probed = summary.probed(),
        cache_hits = summary.cache_hits(),
        errors = %summary.histogram_line(),
        "Validation finished"
    );
    Ok(summary)
}

/// Full run: collect, export, look up own address, validate, publish
pub async fn run(config: &Config) -> Result<RunSummary> {
    let crawler = ProxyCrawler::with_config(config.crawler_config())?;
    let sources = configured_sources(config)?;
    info!(sources = sources.len(), "Starting run");

    let merged = collect_candidates(&crawler, &sources).await;
    config.publisher().export_all(&merged.unique).await?;

    let own = own_address(config).await?;
    validate(config, &merged.unique, &own, config.prober()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::checker::ProbeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OWN: &str = "203.0.113.7";

    /// Every candidate answers with an address derived from its port
    struct EchoProber(AtomicUsize);

    #[async_trait]
    impl Prober for EchoProber {
        async fn probe(
            &self,
            proxy: &Proxy,
            _test_url: &str,
            _timeout: Duration,
        ) -> std::result::Result<String, ProbeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            match proxy.port {
                1 => Ok(OWN.to_string()),
                2 => Err(ProbeError::Failed("Connection reset by peer".to_string())),
                port => Ok(format!("198.51.100.{}", port % 250)),
            }
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        Config {
            probe_cache_dir: dir.join("probes"),
            output_dir: dir.join("out"),
            concurrency: 4,
            checkpoint_interval: 2,
            ..Config::default()
        }
    }

    fn candidates() -> Vec<Proxy> {
        merge(vec![
            Proxy::new("1.1.1.1".to_string(), 8080, ProxyType::Http).with_source("a"),
            Proxy::new("2.2.2.2".to_string(), 1, ProxyType::Http).with_source("a"),
            Proxy::new("3.3.3.3".to_string(), 1080, ProxyType::Socks5).with_source("b"),
            Proxy::new("4.4.4.4".to_string(), 2, ProxyType::Socks4).with_source("b"),
            Proxy::new("1.1.1.1".to_string(), 8080, ProxyType::Http).with_source("c"),
        ])
        .unique
    }

    #[tokio::test]
    async fn test_validate_publishes_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let prober = Arc::new(EchoProber(AtomicUsize::new(0)));

        let summary = validate(&config, &candidates(), OWN, prober.clone()).await.unwrap();
        assert_eq!(prober.0.load(Ordering::SeqCst), 4);
        assert_eq!(summary.working, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.batches.len(), 4);

        let out = dir.path().join("out");
        let read = |name: &str| std::fs::read_to_string(out.join(name)).unwrap();
        assert_eq!(read("http_working.txt"), "1.1.1.1:8080\n");
        assert_eq!(read("socks5_working.txt"), "127.0.0.1:9050\n3.3.3.3:1080\n");
        assert_eq!(read("socks4_working.txt"), "");
        assert_eq!(read("ips.txt"), "1.1.1.1\n3.3.3.3\n");
        assert!(out.join("last_updated.txt").exists());

        let histogram = summary.histogram();
        assert_eq!(histogram.get(&FailureKind::SelfResolution), Some(&1));
        assert_eq!(histogram.get(&FailureKind::ConnectionReset), Some(&1));
        assert_eq!(
            summary.histogram_line(),
            "ConnectionReset=1, SelfResolution=1"
        );

        let state = RunState::load(out.join("proxies.json")).unwrap();
        assert!(state.is_known(ProxyType::Http, "http://2.2.2.2:1"));
        assert!(state.is_known(ProxyType::Socks4, "socks4://4.4.4.4:2"));
    }

    #[tokio::test]
    async fn test_second_run_issues_no_probes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let prober = Arc::new(EchoProber(AtomicUsize::new(0)));

        validate(&config, &candidates(), OWN, prober.clone()).await.unwrap();
        let first = RunState::load(dir.path().join("out/proxies.json")).unwrap();

        let summary = validate(&config, &candidates(), OWN, prober.clone()).await.unwrap();
        let second = RunState::load(dir.path().join("out/proxies.json")).unwrap();

        assert_eq!(prober.0.load(Ordering::SeqCst), 4);
        assert_eq!(summary.probed(), 0);
        assert_eq!(first, second);
    }
}
