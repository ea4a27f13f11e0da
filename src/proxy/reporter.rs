//! Periodic progress reports for a validation batch

use crate::proxy::failure::FailureKind;
use crate::proxy::models::ProxyType;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Point-in-time view of a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub proxy_type: ProxyType,
    /// Workers in use
    pub workers: usize,
    pub elapsed: Duration,
    /// Candidates that need a verdict this run
    pub total: usize,
    /// Candidates skipped because an earlier run resolved them
    pub already_known: usize,
    pub finished: usize,
    pub working: usize,
    pub failed: usize,
    /// Verdicts replayed from the probe cache
    pub cache_hits: usize,
    pub histogram: BTreeMap<FailureKind, usize>,
}

impl BatchReport {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.finished)
    }

    /// Verdicts that needed a network probe
    pub fn probed(&self) -> usize {
        self.finished.saturating_sub(self.cache_hits)
    }

    fn per_second(&self, count: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    /// Failure buckets, most frequent first
    pub fn histogram_line(&self) -> String {
        let mut buckets: Vec<_> = self.histogram.iter().collect();
        buckets.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        buckets
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:.0}s elapsed, {} workers | {}/{} done, {} remaining | {:.1} done/s, {:.2} working/s, {:.1} failed/s",
            self.proxy_type,
            self.elapsed.as_secs_f64(),
            self.workers,
            self.finished,
            self.total,
            self.remaining(),
            self.per_second(self.finished),
            self.per_second(self.working),
            self.per_second(self.failed),
        )?;
        if !self.histogram.is_empty() {
            write!(f, " | errors: {}", self.histogram_line())?;
        }
        Ok(())
    }
}

/// Something a reporter can take snapshots of
pub trait ReportSource {
    fn report(&self) -> BatchReport;
}

/// Emits a [`BatchReport`] on a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    interval: Duration,
}

impl Reporter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Report until the future is dropped.
    ///
    /// Race it against the batch; it never completes on its own.
    pub async fn run<S: ReportSource>(&self, source: &S) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            Self::emit(&source.report());
        }
    }

    pub fn emit(report: &BatchReport) {
        info!(
            protocol = %report.proxy_type,
            finished = report.finished,
            total = report.total,
            working = report.working,
            failed = report.failed,
            "{}",
            report
        );
    }
}
