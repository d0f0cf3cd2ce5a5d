//! One aggregation pass for an (algorithm, measure) pair.
//!
//! discover -> group by network -> fingerprint -> plan -> reduce -> write
//! summaries -> write manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AggConfig;
use crate::discovery::discover;
use crate::error::{AggError, Result};
use crate::metrics::METRICS;
use crate::obs::{self, AggSpan};
use crate::reducer::{reduce_network, NetworkSummary};
use crate::summary::{SummaryFile, SummaryKey, SummaryTable, WriteMode};
use crate::update::{plan_update, Manifest, NetworkManifest, PriorState, UpdatePlan};

/// Outcome of [`Aggregator::run`].
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub key: SummaryKey,
    pub plan: UpdatePlan,
    pub records: usize,
    pub parse_failures: usize,
    pub skipped: usize,
    /// Networks present in the inputs.
    pub networks: usize,
    /// Networks reduced from raw records in this pass.
    pub recomputed: Vec<String>,
    pub written: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
}

/// Summaries already on disk for one (algorithm, measure).
struct Existing {
    files: Vec<(SummaryFile, Option<SummaryTable>)>,
    manifest: Option<Manifest>,
}

impl Existing {
    fn load(config: &AggConfig, dir: &Path) -> Result<Self> {
        let key = config.key();
        let mut files = Vec::new();
        for form in config.forms.forms() {
            let file = SummaryFile::in_dir(dir, form, key.clone());
            let table = file.load()?;
            files.push((file, table));
        }
        let manifest = Manifest::load(&Manifest::path_in(dir, &config.measure))?;
        Ok(Self { files, manifest })
    }

    /// `None` when no summary exists yet.
    fn prior_state(&self) -> Option<PriorState> {
        let path = self
            .files
            .iter()
            .find(|(_, table)| table.is_some())
            .map(|(file, _)| file.path().to_path_buf())?;

        let seed = self
            .files
            .iter()
            .filter_map(|(_, table)| table.as_ref().and_then(|t| t.seed))
            .next()
            .or_else(|| self.manifest.as_ref().map(|m| m.seed));

        // A form file that is missing contributes no rows, so its networks are
        // rewritten everywhere.
        let mut networks: Option<BTreeSet<String>> = None;
        for (_, table) in &self.files {
            let rows: BTreeSet<String> = table
                .as_ref()
                .map(|t| t.rows.keys().cloned().collect())
                .unwrap_or_default();
            networks = Some(match networks {
                Some(acc) => acc.intersection(&rows).cloned().collect(),
                None => rows,
            });
        }

        Some(PriorState {
            path,
            seed,
            manifest: self.manifest.clone(),
            networks: networks.unwrap_or_default(),
        })
    }
}

/// Runs one aggregation described by an [`AggConfig`].
pub struct Aggregator {
    config: AggConfig,
    now: Option<DateTime<Utc>>,
}

impl Aggregator {
    pub fn new(config: AggConfig) -> Self {
        Self { config, now: None }
    }

    /// Pin the timestamp used for headers and backups.
    pub fn with_timestamp(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &AggConfig {
        &self.config
    }

    pub fn run(&self) -> Result<AggregationReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let _span = AggSpan::enter(&cfg.algorithm, &cfg.measure);
        let started = Instant::now();
        let now = self.now.unwrap_or_else(Utc::now);

        let found = discover(&cfg.results_dir, &cfg.algorithm, &cfg.measure)?;
        let groups = found.by_network();
        obs::emit_discovery_finished(
            &found.root,
            found.records.len(),
            groups.len(),
            found.skipped.len(),
        );
        if groups.is_empty() {
            return Err(AggError::NothingToAggregate {
                algorithm: cfg.algorithm.clone(),
                measure: cfg.measure.clone(),
                dir: found.root,
            });
        }

        let current: BTreeMap<String, NetworkManifest> = groups
            .iter()
            .map(|(network, records)| {
                (
                    network.clone(),
                    NetworkManifest::from_records(records, cfg.expectation),
                )
            })
            .collect();

        let dir = cfg.summary_dir();
        let existing = Existing::load(cfg, &dir)?;
        let prior = existing.prior_state();
        let plan = plan_update(prior.as_ref(), cfg.seed, cfg.flags(), &current)?;

        let (to_reduce, reused): (BTreeSet<String>, BTreeSet<String>) = match &plan {
            UpdatePlan::Extend { changed, unchanged } => (changed.clone(), unchanged.clone()),
            UpdatePlan::NoOp => (BTreeSet::new(), current.keys().cloned().collect()),
            _ => (current.keys().cloned().collect(), BTreeSet::new()),
        };
        obs::emit_plan_decided(plan.label(), to_reduce.len(), reused.len());

        let mut report = AggregationReport {
            key: cfg.key(),
            plan: plan.clone(),
            records: found.records.len(),
            parse_failures: found.parse_failures(),
            skipped: found.skipped.len(),
            networks: groups.len(),
            recomputed: to_reduce.iter().cloned().collect(),
            written: Vec::new(),
            backups: Vec::new(),
        };

        if !plan.writes() {
            obs::emit_run_finished(plan.label(), 0, started.elapsed().as_millis() as u64);
            METRICS.flush();
            return Ok(report);
        }

        let reduced: BTreeMap<String, NetworkSummary> = to_reduce
            .iter()
            .filter_map(|network| groups.get_key_value(network))
            .map(|(network, records)| {
                let reduction = reduce_network(network, records, cfg.expectation);
                (network.clone(), reduction.summary)
            })
            .collect();

        let discard = matches!(
            plan,
            UpdatePlan::Revalue {
                discard_existing: true
            }
        );
        for (file, table) in &existing.files {
            let base = if discard { None } else { table.as_ref() };
            let mut updates = reduced.clone();
            if let Some(old) = base {
                for network in &reused {
                    if let Some(row) = old.rows.get(network) {
                        updates.insert(network.clone(), row.clone());
                    }
                }
            }
            let merged = SummaryTable::merged(base, updates, cfg.mode, now, cfg.seed);
            if let Some(backup) = file.store(&merged, now)? {
                report.backups.push(backup);
            }
            report.written.push(file.path().to_path_buf());
        }

        let mut networks = match (&existing.manifest, cfg.mode, discard) {
            (Some(old), WriteMode::Merge, false) => old.networks.clone(),
            _ => BTreeMap::new(),
        };
        networks.extend(current);
        let manifest = Manifest {
            seed: cfg.seed,
            algorithm: cfg.algorithm.clone(),
            measure: cfg.measure.clone(),
            generated_at: now,
            networks,
        };
        manifest.store(&Manifest::path_in(&dir, &cfg.measure))?;

        METRICS.add_networks_written(reduced.len() as u64);
        obs::emit_run_finished(
            plan.label(),
            reduced.len(),
            started.elapsed().as_millis() as u64,
        );
        METRICS.flush();
        Ok(report)
    }
}
