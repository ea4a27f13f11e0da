//! Per-candidate probe result cache
//!
//! One JSON file per `{protocol, host, port}`. Entries older than the TTL
//! are ignored so the candidate gets probed again.

use crate::proxy::checker::same_address;
use crate::proxy::failure::FailureKind;
use crate::proxy::files::write_atomic;
use crate::proxy::models::{ProbeOutcome, ProbeResult, Proxy};
use crate::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default freshness window of a cached verdict (18 hours)
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(18 * 60 * 60);

/// Disk-backed store of probe verdicts
#[derive(Debug, Clone)]
pub struct ProbeCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn entry_path(&self, proxy: &Proxy) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.json", proxy.proxy_type, proxy.host, proxy.port))
    }

    /// Return a fresh cached verdict, or `None` on a miss.
    ///
    /// A cached Working verdict whose observed address is our own address is
    /// rewritten to Failed on disk before being returned.
    pub async fn lookup(&self, proxy: &Proxy, own_address: &str) -> Option<ProbeResult> {
        let path = self.entry_path(proxy);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "Unreadable probe cache entry");
                return None;
            }
        };

        let entry: ProbeResult = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "Malformed probe cache entry");
                return None;
            }
        };
        if entry.proxy != proxy.canonical() {
            return None;
        }

        let age = (Utc::now() - entry.probed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            return None;
        }

        let self_resolving = entry.outcome == ProbeOutcome::Working
            && entry
                .observed_address
                .as_deref()
                .is_some_and(|observed| same_address(observed, own_address));
        if !self_resolving {
            return Some(entry);
        }

        let rewritten = ProbeResult {
            outcome: ProbeOutcome::Failed,
            observed_address: None,
            failure: Some(FailureKind::SelfResolution),
            detail: Some("cached verdict resolves to caller's own address".to_string()),
            ..entry
        };
        info!(proxy = %proxy, "Invalidated cached verdict that resolves to our own address");
        if let Err(e) = self.store(proxy, &rewritten).await {
            warn!(proxy = %proxy, error = %e, "Failed to rewrite probe cache entry");
        }
        Some(rewritten)
    }

    /// Store a verdict, overwriting any previous entry
    pub async fn store(&self, proxy: &Proxy, result: &ProbeResult) -> Result<()> {
        let json = serde_json::to_vec(result)?;
        write_atomic(&self.entry_path(proxy), json).await?;
        Ok(())
    }
}
