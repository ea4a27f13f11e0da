//! Aggregate run state
//!
//! Holds every resolved verdict per protocol. It is loaded at the start of a
//! run so candidates resolved by earlier runs are not probed again.

use crate::proxy::models::{ProbeResult, ProxyType};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

/// Working and failed verdicts of one protocol, keyed by canonical string
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResults {
    #[serde(default, with = "as_sequence")]
    pub working: BTreeMap<String, ProbeResult>,
    #[serde(default, with = "as_sequence")]
    pub failed: BTreeMap<String, ProbeResult>,
}

impl ProtocolResults {
    pub fn contains(&self, canonical: &str) -> bool {
        self.working.contains_key(canonical) || self.failed.contains_key(canonical)
    }

    /// Insert a verdict unless the candidate is already resolved
    pub fn insert(&mut self, result: ProbeResult) -> bool {
        if self.contains(&result.proxy) {
            return false;
        }
        let target = if result.is_working() {
            &mut self.working
        } else {
            &mut self.failed
        };
        target.insert(result.proxy.clone(), result);
        true
    }

    /// Drop failed records that are also working; returns how many
    fn repair(&mut self) -> usize {
        let before = self.failed.len();
        let working = &self.working;
        self.failed.retain(|canonical, _| !working.contains_key(canonical));
        before - self.failed.len()
    }
}

/// Verdicts of all protocols
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunState {
    protocols: BTreeMap<ProxyType, ProtocolResults>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a saved state; a missing file yields an empty state
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut state: RunState = serde_json::from_str(&content)?;
        for (proxy_type, results) in state.protocols.iter_mut() {
            let dropped = results.repair();
            if dropped > 0 {
                warn!(protocol = %proxy_type, dropped, "Dropped failed records that were also working");
            }
        }
        Ok(state)
    }

    /// Like [`RunState::load`], but a corrupt file starts a fresh state
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable run state");
            Self::default()
        })
    }

    pub fn protocol(&self, proxy_type: ProxyType) -> Option<&ProtocolResults> {
        self.protocols.get(&proxy_type)
    }

    pub fn is_known(&self, proxy_type: ProxyType, canonical: &str) -> bool {
        self.protocol(proxy_type)
            .is_some_and(|results| results.contains(canonical))
    }

    /// Record a verdict; returns false if the candidate was already resolved
    pub fn record(&mut self, proxy_type: ProxyType, result: ProbeResult) -> bool {
        self.protocols.entry(proxy_type).or_default().insert(result)
    }

    pub fn working(&self, proxy_type: ProxyType) -> impl Iterator<Item = &ProbeResult> {
        self.protocol(proxy_type)
            .into_iter()
            .flat_map(|results| results.working.values())
    }

    pub fn working_count(&self) -> usize {
        self.protocols.values().map(|r| r.working.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.protocols.values().map(|r| r.failed.len()).sum()
    }

    /// Deduplicated bare hosts of every working candidate
    pub fn working_hosts(&self) -> BTreeSet<String> {
        self.protocols
            .values()
            .flat_map(|results| results.working.values())
            .filter_map(|result| result.host().map(str::to_string))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Stores a canonical-keyed map as a plain list of results
mod as_sequence {
    use crate::proxy::models::ProbeResult;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &BTreeMap<String, ProbeResult>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, ProbeResult>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let results = Vec::<ProbeResult>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for result in results {
            map.entry(result.proxy.clone()).or_insert(result);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::failure::FailureKind;
    use crate::proxy::models::Proxy;

    fn proxy(host: &str, proxy_type: ProxyType) -> Proxy {
        Proxy::new(host.to_string(), 8080, proxy_type)
    }

    #[test]
    fn test_record_is_set_semantics() {
        let mut state = RunState::new();
        let p = proxy("1.1.1.1", ProxyType::Http);

        assert!(state.record(ProxyType::Http, ProbeResult::working(&p, "9.9.9.9".into())));
        assert!(!state.record(ProxyType::Http, ProbeResult::working(&p, "9.9.9.8".into())));
        assert!(!state.record(
            ProxyType::Http,
            ProbeResult::failed(&p, FailureKind::Timeout, "late")
        ));

        assert_eq!(state.working_count(), 1);
        assert_eq!(state.failed_count(), 0);
        assert!(state.is_known(ProxyType::Http, "http://1.1.1.1:8080"));
        assert!(!state.is_known(ProxyType::Socks5, "http://1.1.1.1:8080"));
    }

    #[test]
    fn test_working_hosts_are_deduplicated() {
        let mut state = RunState::new();
        let a = proxy("1.1.1.1", ProxyType::Http);
        let b = proxy("1.1.1.1", ProxyType::Socks5);
        let c = proxy("2.2.2.2", ProxyType::Socks4);
        state.record(ProxyType::Http, ProbeResult::working(&a, "5.5.5.5".into()));
        state.record(ProxyType::Socks5, ProbeResult::working(&b, "5.5.5.6".into()));
        state.record(
            ProxyType::Socks4,
            ProbeResult::failed(&c, FailureKind::ConnectionRefused, "refused"),
        );

        let hosts: Vec<_> = state.working_hosts().into_iter().collect();
        assert_eq!(hosts, vec!["1.1.1.1".to_string()]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = RunState::new();
        let p = proxy("3.3.3.3", ProxyType::Socks5);
        state.record(ProxyType::Socks5, ProbeResult::working(&p, "7.7.7.7".into()));
        std::fs::write(&path, state.to_json().unwrap()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["socks5"]["working"].is_array());

        let loaded = RunState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_repairs_contradictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let p = proxy("4.4.4.4", ProxyType::Http);
        let working = ProbeResult::working(&p, "8.8.4.4".into());
        let failed = ProbeResult::failed(&p, FailureKind::Timeout, "t");
        let json = serde_json::json!({
            "http": { "working": [working], "failed": [failed] }
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let loaded = RunState::load(&path).unwrap();
        let http = loaded.protocol(ProxyType::Http).unwrap();
        assert_eq!(http.working.len(), 1);
        assert!(http.failed.is_empty());
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(RunState::load(&missing).unwrap(), RunState::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert!(RunState::load(&corrupt).is_err());
        assert_eq!(RunState::load_or_default(&corrupt), RunState::default());
    }
}
