//! qmagg core library
//!
//! Folds per-run quality-measure scores of clustering algorithms into one
//! reproducible summary row per network, and keeps those summaries up to
//! date across incremental re-runs.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod reducer;
pub mod score;
pub mod stats;
pub mod summary;
pub mod telemetry;
pub mod update;

pub use config::{read_seed_file, AggConfig, FormSelection, RunConfig};
pub use discovery::{discover, group_by_network, parse_level_log, Discovery, Skipped};
pub use engine::{AggregationReport, Aggregator};
pub use error::{AggError, ParseFailure, PathFailure, Result};
pub use identity::{classify_path, has_level_layout, RunIdentity, RunName};
pub use reducer::{
    reduce_network, Expectation, InstanceAggregate, NetworkReduction, NetworkSummary,
    MAX_EXPECTED_RUNS,
};
pub use score::{parse_score, EvaluatorOutput, JobStatus, ScoreRecord};
pub use stats::SampleStats;
pub use summary::{fmt_num, SummaryFile, SummaryForm, SummaryKey, SummaryTable, WriteMode};
pub use update::{fingerprint, plan_update, Manifest, NetworkManifest, UpdateFlags, UpdatePlan};

pub use metrics::METRICS;
pub use obs::AggSpan;
pub use telemetry::init_tracing;

/// Crate version, kept in step with the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
