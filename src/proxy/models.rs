//! Proxy data models

use crate::proxy::failure::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy type enumeration
///
/// Ordering follows the order batches are validated and files are published.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Every supported proxy type
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Https,
        ProxyType::Socks4,
        ProxyType::Socks5,
    ];

    /// URL scheme used for this proxy type
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }

    /// Whether this is one of the tunneling (SOCKS) protocols
    pub fn is_tunnel(&self) -> bool {
        matches!(self, ProxyType::Socks4 | ProxyType::Socks5)
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for ProxyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(anyhow::anyhow!(
                "Invalid proxy type: {}. Use: http, https, socks4, socks5",
                s
            )),
        }
    }
}

/// A normalized proxy candidate.
///
/// Built once by the parser and never mutated afterwards. The canonical
/// string `protocol://host:port` is the key for deduplication, the probe
/// cache and the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    /// Feed the candidate was first seen in
    pub source: String,
}

impl Proxy {
    /// Create a new proxy with no source attribution
    pub fn new(host: String, port: u16, proxy_type: ProxyType) -> Self {
        Self {
            host,
            port,
            proxy_type,
            source: String::new(),
        }
    }

    /// Attach the originating source URL
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Get the canonical `protocol://host:port` string
    pub fn canonical(&self) -> String {
        format!("{}://{}:{}", self.proxy_type, self.host, self.port)
    }

    /// Get the proxy string in HOST:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Verdict of a proxy check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    Working,
    Failed,
}

/// Result of one probe, fresh or replayed from the probe cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Canonical string of the probed candidate
    pub proxy: String,
    pub outcome: ProbeOutcome,
    /// Address the test endpoint saw when going through the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Raw error text behind `failure`, kept for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub probed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn working(proxy: &Proxy, observed_address: String) -> Self {
        Self {
            proxy: proxy.canonical(),
            outcome: ProbeOutcome::Working,
            observed_address: Some(observed_address),
            failure: None,
            detail: None,
            probed_at: Utc::now(),
        }
    }

    pub fn failed(proxy: &Proxy, failure: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            proxy: proxy.canonical(),
            outcome: ProbeOutcome::Failed,
            observed_address: None,
            failure: Some(failure),
            detail: Some(detail.into()),
            probed_at: Utc::now(),
        }
    }

    pub fn is_working(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Working)
    }

    /// `host:port` part of the canonical string
    pub fn endpoint(&self) -> &str {
        self.proxy
            .split_once("://")
            .map_or(self.proxy.as_str(), |(_, rest)| rest)
    }

    /// Host part of the canonical string, without port
    pub fn host(&self) -> Option<&str> {
        self.endpoint().rsplit_once(':').map(|(host, _)| host)
    }
}
