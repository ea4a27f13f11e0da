//! Proxy checker module for probing a single candidate
//!
//! A probe sends one request through the candidate to an endpoint that
//! echoes the caller's address. The verdict is Working only when the echoed
//! address is a valid IP that differs from our own.

use crate::proxy::failure::FailureKind;
use crate::proxy::models::{ProbeResult, Proxy, ProxyType};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Extra time granted to a probe before it is forcibly cancelled
const DEFAULT_GRACE_SECS: u64 = 5;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 50;

/// Default number of verdicts between checkpoints
const DEFAULT_CHECKPOINT_INTERVAL: usize = 200;

/// Default interval between progress reports in seconds
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 15;

/// Default URL to test proxies against; it answers with the caller's IP
pub const DEFAULT_TEST_URL: &str = "https://api.ipify.org";

/// Longest response excerpt kept in a failure detail
const RESPONSE_EXCERPT_LEN: usize = 64;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout handed to the probing backend
    pub timeout: Duration,
    /// Added to `timeout` to form the hard cancellation deadline
    pub grace_period: Duration,
    /// Number of concurrent workers per batch
    pub concurrency: usize,
    /// URL to test proxies against
    pub test_url: String,
    /// Verdicts between two checkpoints
    pub checkpoint_interval: usize,
    /// Interval between progress reports
    pub report_interval: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            grace_period: Duration::from_secs(DEFAULT_GRACE_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

/// Failure of a single probe
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(String),
    #[error("internal probe error: {0}")]
    Internal(String),
}

impl ProbeError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProbeError::Timeout(_) => FailureKind::Timeout,
            ProbeError::Failed(message) => FailureKind::classify(message),
            ProbeError::Internal(_) => FailureKind::InternalProbeError,
        }
    }
}

/// Backend able to send one request through a proxy.
///
/// Returns the body the test endpoint answered with.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        proxy: &Proxy,
        test_url: &str,
        timeout: Duration,
    ) -> std::result::Result<String, ProbeError>;
}

/// Probes by running the `curl` binary
#[derive(Debug, Clone)]
pub struct CurlProber {
    binary: PathBuf,
}

impl CurlProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for CurlProber {
    fn default() -> Self {
        Self::new("curl")
    }
}

#[async_trait]
impl Prober for CurlProber {
    async fn probe(
        &self,
        proxy: &Proxy,
        test_url: &str,
        timeout: Duration,
    ) -> std::result::Result<String, ProbeError> {
        let max_time = timeout.as_secs().max(1).to_string();
        let output = Command::new(&self.binary)
            .args(["-sS", "-4", "--proxy-insecure", "--max-time", max_time.as_str(), "--proxy"])
            .arg(proxy.canonical())
            .arg(test_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProbeError::Internal(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProbeError::Failed(if stderr.is_empty() {
                format!("curl exited with {}", output.status)
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Probes with an in-process reqwest client.
///
/// reqwest has no SOCKS4 connector, so SOCKS4 candidates go to a fallback
/// prober, `curl` unless configured otherwise.
#[derive(Clone)]
pub struct NativeProber {
    accept_invalid_certs: bool,
    socks4: Arc<dyn Prober>,
}

impl NativeProber {
    pub fn new(accept_invalid_certs: bool) -> Self {
        Self {
            accept_invalid_certs,
            socks4: Arc::new(CurlProber::default()),
        }
    }

    /// Use `prober` for SOCKS4 candidates
    pub fn with_socks4_fallback(mut self, prober: Arc<dyn Prober>) -> Self {
        self.socks4 = prober;
        self
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy: &Proxy, timeout: Duration) -> Result<Client> {
        let client = Client::builder()
            .proxy(ReqwestProxy::all(proxy.canonical())?)
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .build()?;

        Ok(client)
    }
}

impl Default for NativeProber {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Prober for NativeProber {
    async fn probe(
        &self,
        proxy: &Proxy,
        test_url: &str,
        timeout: Duration,
    ) -> std::result::Result<String, ProbeError> {
        if proxy.proxy_type == ProxyType::Socks4 {
            return self.socks4.probe(proxy, test_url, timeout).await;
        }

        let client = self
            .create_client(proxy, timeout)
            .map_err(|e| ProbeError::Internal(format!("{:#}", e)))?;

        let response = client.get(test_url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Failed(error_chain(&e))
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeError::Failed(format!(
                "received HTTP code {}",
                response.status().as_u16()
            )));
        }

        response
            .text()
            .await
            .map(|body| body.trim().to_string())
            .map_err(|e| ProbeError::Failed(error_chain(&e)))
    }
}

/// Flatten an error and its sources into one line
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Compare two textual addresses, as IPs when both parse
pub fn same_address(a: &str, b: &str) -> bool {
    match (a.trim().parse::<IpAddr>(), b.trim().parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Turn a probe outcome into a verdict.
///
/// Rules, first match wins: probe error, non-IP body, body equal to our
/// own address, otherwise Working.
pub fn verdict(
    proxy: &Proxy,
    outcome: std::result::Result<String, ProbeError>,
    own_address: &str,
) -> ProbeResult {
    let body = match outcome {
        Ok(body) => body,
        Err(e) => return ProbeResult::failed(proxy, e.failure_kind(), e.to_string()),
    };

    let body = body.trim();
    let Ok(observed) = body.parse::<IpAddr>() else {
        let excerpt: String = body.chars().take(RESPONSE_EXCERPT_LEN).collect();
        return ProbeResult::failed(
            proxy,
            FailureKind::InvalidResponseFormat,
            format!("unexpected response: {:?}", excerpt),
        );
    };

    if same_address(&observed.to_string(), own_address) {
        return ProbeResult::failed(
            proxy,
            FailureKind::SelfResolution,
            "resolves to caller's own address",
        );
    }

    ProbeResult::working(proxy, observed.to_string())
}

/// Look up the caller's public address.
///
/// Every later verdict depends on it, so callers treat failure as fatal.
pub async fn lookup_own_address(client: &Client, url: &str) -> Result<String> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let body = body.trim();
    let address: IpAddr = body
        .parse()
        .map_err(|_| anyhow::anyhow!("own-address endpoint {} returned {:?}", url, body))?;
    Ok(address.to_string())
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    prober: Arc<dyn Prober>,
}

impl ProxyChecker {
    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig, prober: Arc<dyn Prober>) -> Self {
        Self { config, prober }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe a single proxy under a hard deadline and judge the outcome.
    ///
    /// Dropping the probe future on expiry kills a running curl child.
    pub async fn check_proxy(&self, proxy: &Proxy, own_address: &str) -> ProbeResult {
        let deadline = self.config.timeout + self.config.grace_period;
        let probe = self.prober.probe(proxy, &self.config.test_url, self.config.timeout);
        let outcome = match tokio::time::timeout(deadline, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(deadline)),
        };
        verdict(proxy, outcome, own_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProxyType;

    struct SleepyProber;

    #[async_trait]
    impl Prober for SleepyProber {
        async fn probe(
            &self,
            _proxy: &Proxy,
            _test_url: &str,
            _timeout: Duration,
        ) -> std::result::Result<String, ProbeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("198.51.100.1".to_string())
        }
    }

    fn proxy() -> Proxy {
        Proxy::new("1.2.3.4".to_string(), 1080, ProxyType::Socks5)
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert_eq!(config.checkpoint_interval, 200);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_concurrency(20)
            .with_test_url("http://example.com".to_string())
            .with_checkpoint_interval(5);

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.test_url, "http://example.com");
        assert_eq!(config.checkpoint_interval, 5);
    }

    #[test]
    fn test_verdict_working() {
        let result = verdict(&proxy(), Ok(" 198.51.100.7\n".to_string()), "203.0.113.7");
        assert!(result.is_working());
        assert_eq!(result.observed_address.as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn test_verdict_self_resolution() {
        let result = verdict(&proxy(), Ok("203.0.113.7".to_string()), "203.0.113.7");
        assert!(!result.is_working());
        assert_eq!(result.failure, Some(FailureKind::SelfResolution));
    }

    #[test]
    fn test_verdict_invalid_response() {
        let result = verdict(&proxy(), Ok("<html>blocked</html>".to_string()), "203.0.113.7");
        assert_eq!(result.failure, Some(FailureKind::InvalidResponseFormat));
    }

    #[test]
    fn test_verdict_probe_errors() {
        let result = verdict(
            &proxy(),
            Err(ProbeError::Failed("curl: (7) Connection refused".to_string())),
            "203.0.113.7",
        );
        assert_eq!(result.failure, Some(FailureKind::ConnectionRefused));

        let result = verdict(
            &proxy(),
            Err(ProbeError::Internal("spawn failed".to_string())),
            "203.0.113.7",
        );
        assert_eq!(result.failure, Some(FailureKind::InternalProbeError));
    }

    #[test]
    fn test_same_address() {
        assert!(same_address("::1", "0:0:0:0:0:0:0:1"));
        assert!(same_address(" 10.0.0.1", "10.0.0.1"));
        assert!(!same_address("10.0.0.1", "10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_proxy_times_out() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(1))
            .with_grace_period(Duration::from_secs(1));
        let checker = ProxyChecker::with_config(config, Arc::new(SleepyProber));

        let result = checker.check_proxy(&proxy(), "203.0.113.7").await;
        assert_eq!(result.failure, Some(FailureKind::Timeout));
    }

    struct FixedProber(&'static str);

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(
            &self,
            _proxy: &Proxy,
            _test_url: &str,
            _timeout: Duration,
        ) -> std::result::Result<String, ProbeError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_native_prober_hands_socks4_to_fallback() {
        let prober =
            NativeProber::default().with_socks4_fallback(Arc::new(FixedProber("198.51.100.9")));
        let socks4 = Proxy::new("127.0.0.1".to_string(), 1, ProxyType::Socks4);

        let outcome = prober
            .probe(&socks4, DEFAULT_TEST_URL, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, Ok("198.51.100.9".to_string()));

        let result = verdict(&socks4, outcome, "203.0.113.7");
        assert!(result.is_working());
        assert_ne!(result.failure, Some(FailureKind::InternalProbeError));
    }

    #[tokio::test]
    async fn test_curl_prober_missing_binary_is_internal_error() {
        let prober = CurlProber::new("/nonexistent/curl-binary");
        let err = prober
            .probe(&proxy(), DEFAULT_TEST_URL, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::InternalProbeError);
    }
}
