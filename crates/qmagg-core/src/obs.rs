//! Structured lifecycle events for an aggregation run.
//!
//! Every event carries an `event` field so JSON logs can be filtered on it.

use std::path::Path;

use tracing::info;

/// Enters a span tagged with the (algorithm, measure) pair for the lifetime
/// of the guard.
pub struct AggSpan {
    _span: tracing::span::EnteredSpan,
}

impl AggSpan {
    /// Create and enter the span.
    pub fn enter(algorithm: &str, measure: &str) -> Self {
        let span = tracing::info_span!("qmagg.aggregate", algorithm = %algorithm, measure = %measure);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: the result tree was walked, with record, network and skip counts.
pub fn emit_discovery_finished(root: &Path, records: usize, networks: usize, skipped: usize) {
    info!(
        event = "discovery.finished",
        root = %root.display(),
        records = records,
        networks = networks,
        skipped = skipped,
    );
}

/// Emit event: the update plan for this pair, with recomputed and reused network counts.
pub fn emit_plan_decided(plan: &str, changed: usize, unchanged: usize) {
    info!(
        event = "update.plan",
        plan = %plan,
        changed = changed,
        unchanged = unchanged,
    );
}

/// Emit event: a summary file was persisted, with its backup when one was made.
pub fn emit_summary_written(path: &Path, rows: usize, backup: Option<&Path>) {
    match backup {
        Some(b) => info!(
            event = "summary.written",
            path = %path.display(),
            rows = rows,
            backup = %b.display(),
        ),
        None => info!(event = "summary.written", path = %path.display(), rows = rows),
    }
}

/// Emit event: a result file or line was skipped (warning level).
pub fn emit_path_rejected(path: &Path, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "discovery.path_rejected", path = %path.display(), error = %error);
}

/// Emit event: the pair finished, with the networks recomputed and the duration.
pub fn emit_run_finished(plan: &str, networks: usize, duration_ms: u64) {
    info!(
        event = "aggregate.finished",
        plan = %plan,
        networks = networks,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_and_events_do_not_panic() {
        let _span = AggSpan::enter("daoc", "nmi");
        emit_summary_written(Path::new("out/nmi.res"), 2, Some(Path::new("out/nmi.res.bak")));
        emit_plan_decided("noop", 0, 3);
    }
}
