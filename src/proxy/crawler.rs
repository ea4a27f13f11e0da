//! Proxy crawler module for fetching proxy feeds through a local cache
//!
//! This module provides functionality for:
//! - Downloading plain-text and CSV proxy feeds
//! - Keeping each feed in a cache file that is reused while fresh
//! - Falling back to a stale copy when a download fails
//! - Parsing every feed into candidates with per-line diagnostics

use crate::proxy::models::{Proxy, ProxyType};
use crate::proxy::parser::{LineDiagnostic, ProxyParser};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default total timeout for feed downloads in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default connect timeout for feed downloads in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default freshness window of a cached feed (6 hours)
const DEFAULT_CACHE_TTL_SECS: u64 = 6 * 60 * 60;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("Invalid sanitize regex"));

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("Invalid scheme regex"));

/// Availability of a feed after consulting the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Cache file is within its TTL, either reused or just downloaded
    Fresh(PathBuf),
    /// Download failed; an outdated cache file is used instead
    Stale(PathBuf),
    /// Download failed and nothing is cached
    Unavailable,
}

impl FetchOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Fresh(path) | FetchOutcome::Stale(path) => Some(path),
            FetchOutcome::Unavailable => None,
        }
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Proxies extracted from the source
    pub proxies: Vec<Proxy>,
    /// Number of blank, comment and header lines
    pub skipped: usize,
    /// Lines that could not be turned into a proxy
    pub diagnostics: Vec<LineDiagnostic>,
    /// Whether a stale cache copy was used
    pub degraded: bool,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            proxies: Vec::new(),
            skipped: 0,
            diagnostics: Vec::new(),
            degraded: false,
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Total timeout for HTTP requests
    pub timeout: Duration,
    /// Connect timeout for HTTP requests
    pub connect_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Accept invalid TLS certificates from feed hosts
    pub accept_invalid_certs: bool,
    /// Directory holding one cache file per feed
    pub cache_dir: PathBuf,
    /// How long a cached feed is reused without downloading
    pub cache_ttl: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: true,
            cache_dir: PathBuf::from(".cache/sources"),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Proxy source representing a feed that provides a proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// URL to fetch proxies from
    pub url: String,
    /// Protocol assumed for entries without an explicit prefix
    pub proxy_type: ProxyType,
}

impl ProxySource {
    pub fn new(url: &str, proxy_type: ProxyType) -> Self {
        Self {
            url: url.to_string(),
            proxy_type,
        }
    }

    /// Parse a `<protocol> <url>` line of a source list file.
    ///
    /// Blank lines and `#` comments yield `None`.
    pub fn parse_line(line: &str) -> Option<Result<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let mut parts = trimmed.split_whitespace();
        let (Some(kind), Some(url), None) = (parts.next(), parts.next(), parts.next()) else {
            return Some(Err(anyhow::anyhow!(
                "expected '<protocol> <url>', got '{}'",
                trimmed
            )));
        };
        Some(kind.parse().map(|proxy_type| Self::new(url, proxy_type)))
    }

    /// Load a source list file, skipping malformed lines
    pub fn load_list<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        let mut sources = Vec::new();
        for (index, line) in content.lines().enumerate() {
            match Self::parse_line(line) {
                Some(Ok(source)) => sources.push(source),
                Some(Err(e)) => warn!(line = index + 1, error = %e, "Skipping source list entry"),
                None => {}
            }
        }
        Ok(sources)
    }
}

/// Proxy crawler for fetching proxy feeds
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { config, client })
    }

    /// Cache file used for a feed URL
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.config.cache_dir.join(sanitize_url(url))
    }

    /// Get a local copy of a feed, downloading it only when the cache is stale.
    ///
    /// Never fails: download problems degrade to the stale copy or to
    /// [`FetchOutcome::Unavailable`].
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let path = self.cache_path(url);

        if let Some(age) = file_age(&path) {
            if age < self.config.cache_ttl {
                debug!(source = %url, age_secs = age.as_secs(), "Using cached feed");
                return FetchOutcome::Fresh(path);
            }
        }

        match self.download(url, &path).await {
            Ok(bytes) => {
                info!(source = %url, bytes, "Downloaded feed");
                FetchOutcome::Fresh(path)
            }
            Err(e) if path.exists() => {
                warn!(source = %url, error = %e, "Download failed, using stale cached feed");
                FetchOutcome::Stale(path)
            }
            Err(e) => {
                warn!(source = %url, error = %e, "Download failed and no cached copy exists");
                FetchOutcome::Unavailable
            }
        }
    }

    async fn download(&self, url: &str, path: &Path) -> Result<usize> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &body).await?;
        touch(path)?;
        Ok(body.len())
    }

    /// Fetch and parse a single source
    pub async fn crawl_source(&self, source: &ProxySource) -> CrawlResult {
        let outcome = self.fetch(&source.url).await;
        let degraded = matches!(outcome, FetchOutcome::Stale(_));
        let Some(path) = outcome.path() else {
            return CrawlResult::failure(source.url.clone(), "feed unavailable".to_string());
        };

        let content = match tokio::fs::read(path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(source = %source.url, error = %e, "Failed to read cached feed");
                return CrawlResult::failure(source.url.clone(), e.to_string());
            }
        };

        let parsed = ProxyParser::parse_source(&content, Some(source.proxy_type), &source.url);
        for diag in &parsed.diagnostics {
            debug!(
                source = %source.url,
                line = diag.line_number,
                raw = %diag.raw,
                reason = %diag.reason,
                "Rejected line"
            );
        }
        info!(
            source = %source.url,
            accepted = parsed.proxies.len(),
            skipped = parsed.skipped,
            rejected = parsed.diagnostics.len(),
            degraded,
            "Parsed feed"
        );

        CrawlResult {
            source: source.url.clone(),
            proxies: parsed.proxies,
            skipped: parsed.skipped,
            diagnostics: parsed.diagnostics,
            degraded,
            error: None,
        }
    }

    /// Fetch and parse multiple sources in order, returning results for each
    pub async fn crawl_sources(&self, sources: &[ProxySource]) -> Vec<CrawlResult> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            results.push(self.crawl_source(source).await);
        }
        results
    }

    /// Get a list of common free proxy feeds
    pub fn get_common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::new(
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
                ProxyType::Socks5,
            ),
            ProxySource::new(
                "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
                ProxyType::Socks5,
            ),
            ProxySource::new(
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
                ProxyType::Socks4,
            ),
            ProxySource::new(
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
                ProxyType::Http,
            ),
            ProxySource::new(
                "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/https.txt",
                ProxyType::Https,
            ),
        ]
    }
}

/// Turn a URL into a filesystem-safe cache file name
pub fn sanitize_url(url: &str) -> String {
    let without_scheme = SCHEME.replace(url, "");
    UNSAFE_CHARS.replace_all(&without_scheme, "_").into_owned()
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Stamp the modification time explicitly; some filesystems keep the old one
fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}
