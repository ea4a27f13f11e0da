//! Cross-source deduplication

use crate::proxy::models::{Proxy, ProxyType};
use std::collections::{BTreeMap, HashSet};

/// Candidates of every source, deduplicated by canonical string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    /// In first-seen order
    pub unique: Vec<Proxy>,
    pub by_protocol: BTreeMap<ProxyType, Vec<Proxy>>,
}

impl Merged {
    pub fn len(&self) -> usize {
        self.unique.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }

    pub fn protocol(&self, proxy_type: ProxyType) -> &[Proxy] {
        self.by_protocol
            .get(&proxy_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Merge candidates in source order.
///
/// The first occurrence of a canonical string wins and keeps its source;
/// later duplicates are dropped.
pub fn merge<I>(candidates: I) -> Merged
where
    I: IntoIterator<Item = Proxy>,
{
    let mut seen = HashSet::new();
    let mut merged = Merged::default();
    for proxy in candidates {
        if !seen.insert(proxy.canonical()) {
            continue;
        }
        merged
            .by_protocol
            .entry(proxy.proxy_type)
            .or_default()
            .push(proxy.clone());
        merged.unique.push(proxy);
    }
    merged
}
