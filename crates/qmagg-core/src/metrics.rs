//! Process-wide aggregation counters.
//!
//! Incremented at the call site and reported once per run through
//! [`Metrics::flush`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters, no locking.
pub struct Metrics {
    records_parsed: AtomicU64,
    parse_failures: AtomicU64,
    path_failures: AtomicU64,
    networks_written: AtomicU64,
    backups_created: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            records_parsed: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            path_failures: AtomicU64::new(0),
            networks_written: AtomicU64::new(0),
            backups_created: AtomicU64::new(0),
        }
    }

    /// A score record was built, whether or not its value parsed.
    pub fn inc_records(&self) {
        self.records_parsed.fetch_add(1, Ordering::Relaxed);
    }

    /// A record whose evaluator output did not yield a score.
    pub fn inc_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "parse_failures", "counter incremented");
    }

    /// A result file or level-log line skipped for its name or level.
    pub fn inc_path_failures(&self) {
        self.path_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "path_failures", "counter incremented");
    }

    /// Networks reduced and written in one pass.
    pub fn add_networks_written(&self, n: u64) {
        self.networks_written.fetch_add(n, Ordering::Relaxed);
    }

    /// A previous summary was copied to a backup before being replaced.
    pub fn inc_backups(&self) {
        self.backups_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "backups_created", "counter incremented");
    }

    /// Emit all counters as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            records_parsed = self.records_parsed(),
            parse_failures = self.parse_failures(),
            path_failures = self.path_failures(),
            networks_written = self.networks_written(),
            backups_created = self.backups_created(),
        );
    }

    /// Read the current records count.
    pub fn records_parsed(&self) -> u64 {
        self.records_parsed.load(Ordering::Relaxed)
    }

    /// Read the current parse-failure count.
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    /// Read the current path-failure count.
    pub fn path_failures(&self) -> u64 {
        self.path_failures.load(Ordering::Relaxed)
    }

    /// Read the current networks-written count.
    pub fn networks_written(&self) -> u64 {
        self.networks_written.load(Ordering::Relaxed)
    }

    /// Read the current backups count.
    pub fn backups_created(&self) -> u64 {
        self.backups_created.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        self.records_parsed.store(0, Ordering::Relaxed);
        self.parse_failures.store(0, Ordering::Relaxed);
        self.path_failures.store(0, Ordering::Relaxed);
        self.networks_written.store(0, Ordering::Relaxed);
        self.backups_created.store(0, Ordering::Relaxed);
    }
}
