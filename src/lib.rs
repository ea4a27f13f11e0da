//! Proxy Sieve - Proxy list collector and validator
//!
//! Pulls candidate proxies from text feeds, normalizes and deduplicates
//! them, then probes every candidate to keep a list of working anonymizing
//! proxies per protocol.

pub mod pipeline;
pub mod proxy;

pub use proxy::*;

use crate::proxy::checker::DEFAULT_TEST_URL;
use crate::proxy::probe_cache::DEFAULT_PROBE_TTL;
use crate::proxy::publisher::DEFAULT_OPERATOR_RELAY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// How a single probe is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// Run the external `curl` binary
    #[default]
    Curl,
    /// In-process reqwest client
    Native,
}

/// Application configuration
///
/// Loaded from a TOML file; every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Downloaded feed copies
    pub cache_dir: PathBuf,
    /// One file per probed candidate
    pub probe_cache_dir: PathBuf,
    /// Run state, working lists, address list and CSV export
    pub output_dir: PathBuf,
    pub source_ttl_secs: u64,
    pub probe_ttl_secs: u64,
    pub concurrency: usize,
    pub checkpoint_interval: usize,
    pub report_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub probe_grace_secs: u64,
    /// Endpoint probed through each candidate; answers with the caller's IP
    pub test_url: String,
    /// Endpoint used directly to learn our own public address
    pub own_address_url: String,
    pub backend: ProbeBackend,
    pub curl_path: PathBuf,
    /// Entry always listed first in the SOCKS5 output
    pub operator_relay: String,
    pub user_agent: Option<String>,
    /// Optional `<protocol> <url>` list replacing the built-in feeds
    pub sources_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let checker = CheckerConfig::default();
        Self {
            cache_dir: PathBuf::from(".cache/sources"),
            probe_cache_dir: PathBuf::from(".cache/probes"),
            output_dir: PathBuf::from("output"),
            source_ttl_secs: CrawlerConfig::default().cache_ttl.as_secs(),
            probe_ttl_secs: DEFAULT_PROBE_TTL.as_secs(),
            concurrency: checker.concurrency,
            checkpoint_interval: checker.checkpoint_interval,
            report_interval_secs: checker.report_interval.as_secs(),
            probe_timeout_secs: checker.timeout.as_secs(),
            probe_grace_secs: checker.grace_period.as_secs(),
            test_url: DEFAULT_TEST_URL.to_string(),
            own_address_url: DEFAULT_TEST_URL.to_string(),
            backend: ProbeBackend::default(),
            curl_path: PathBuf::from("curl"),
            operator_relay: DEFAULT_OPERATOR_RELAY.to_string(),
            user_agent: None,
            sources_file: None,
        }
    }
}

impl Config {
    /// Load a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        Ok(toml::from_str(&content)?)
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        let config = CrawlerConfig::new()
            .with_cache_dir(&self.cache_dir)
            .with_cache_ttl(Duration::from_secs(self.source_ttl_secs));
        match &self.user_agent {
            Some(agent) => config.with_user_agent(agent.clone()),
            None => config,
        }
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_concurrency(self.concurrency)
            .with_timeout(Duration::from_secs(self.probe_timeout_secs))
            .with_grace_period(Duration::from_secs(self.probe_grace_secs))
            .with_test_url(self.test_url.clone())
            .with_checkpoint_interval(self.checkpoint_interval)
            .with_report_interval(Duration::from_secs(self.report_interval_secs))
    }

    pub fn probe_cache(&self) -> ProbeCache {
        ProbeCache::new(&self.probe_cache_dir, Duration::from_secs(self.probe_ttl_secs))
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(&self.output_dir, self.operator_relay.clone())
    }

    /// Probing backend selected by `backend`
    pub fn prober(&self) -> Arc<dyn Prober> {
        match self.backend {
            ProbeBackend::Curl => Arc::new(CurlProber::new(&self.curl_path)),
            ProbeBackend::Native => Arc::new(
                NativeProber::default()
                    .with_socks4_fallback(Arc::new(CurlProber::new(&self.curl_path))),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.checkpoint_interval, 200);
        assert_eq!(config.source_ttl_secs, 6 * 60 * 60);
        assert_eq!(config.probe_ttl_secs, 18 * 60 * 60);
        assert_eq!(config.backend, ProbeBackend::Curl);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sieve.toml");
        std::fs::write(
            &path,
            "concurrency = 8\nbackend = \"native\"\noutput_dir = \"/tmp/out\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.backend, ProbeBackend::Native);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.probe_timeout_secs, 10);

        let checker = config.checker_config();
        assert_eq!(checker.concurrency, 8);
        assert_eq!(checker.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn test_config_rejects_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sieve.toml");
        std::fs::write(&path, "backend = \"telnet\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
