//! Proxy module for collecting and validating proxies
//!
//! This module provides functionality for:
//! - Fetching proxy feeds through a TTL-based local cache
//! - Parsing feed lines into canonical candidates with diagnostics
//! - Deduplicating candidates across feeds
//! - Probing candidates with a bounded worker pool and a probe cache
//! - Publishing run state, working lists and a CSV export

pub mod checker;
pub mod crawler;
pub mod dedup;
pub mod engine;
pub mod failure;
mod files;
pub mod models;
pub mod parser;
pub mod probe_cache;
pub mod publisher;
pub mod reporter;
pub mod state;

pub use checker::{
    lookup_own_address, CheckerConfig, CurlProber, NativeProber, ProbeError, Prober, ProxyChecker,
};
pub use crawler::{CrawlResult, CrawlerConfig, FetchOutcome, ProxyCrawler, ProxySource};
pub use dedup::{merge, Merged};
pub use engine::ValidationEngine;
pub use failure::FailureKind;
pub use models::{ProbeOutcome, ProbeResult, Proxy, ProxyType};
pub use parser::{LineDiagnostic, LineOutcome, ParsedSource, ProxyParser, Rejection, SourceFormat};
pub use probe_cache::ProbeCache;
pub use publisher::Publisher;
pub use reporter::{BatchReport, Reporter};
pub use state::RunState;
