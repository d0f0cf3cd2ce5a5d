//! Per-network reduction of score records.
//!
//! For every (instance, shuffle) the best level is selected (highest score,
//! ties to the lowest level). Shuffles are then averaged per instance and
//! instances are averaged with equal weight into a [`NetworkSummary`].
//!
//! Runs carrying different algorithm params are reduced independently and
//! the params variant with the highest mean represents the network.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::score::ScoreRecord;
use crate::stats::SampleStats;

/// Expected evaluation grid of a network.
///
/// When given, `(instance, shuffle)` pairs of the grid that produced no
/// record at all are counted as fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub instances: u32,
    pub shuffles: u32,
}

/// Largest expected grid accepted by configuration validation.
pub const MAX_EXPECTED_RUNS: u32 = 1_000_000;

impl Expectation {
    /// Expected (instance, shuffle) runs, saturating at `u32::MAX`.
    pub fn runs(&self) -> u32 {
        self.instances.saturating_mul(self.shuffles)
    }

    /// Expected runs, `None` when the product overflows.
    pub fn checked_runs(&self) -> Option<u32> {
        self.instances.checked_mul(self.shuffles)
    }
}

/// Best level of one (instance, shuffle) run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelBest {
    pub value: f64,
    pub level: u32,
}

/// Reduction of one network instance over its shuffles.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceAggregate {
    pub instance: u32,
    /// Best value of the representative (lowest usable) shuffle.
    pub best_value: f64,
    pub best_level: u32,
    /// Best-level values of the usable shuffles, in shuffle order.
    pub shuffle_values: Vec<f64>,
    pub mean: f64,
    pub stddev: f64,
    pub count: u32,
    pub fails: u32,
}

impl InstanceAggregate {
    fn from_shuffles(instance: u32, shuffles: &BTreeMap<u32, Option<LevelBest>>) -> Self {
        let representative = shuffles.values().flatten().next().copied();
        let stats: SampleStats = shuffles.values().flatten().map(|b| b.value).collect();
        let fails = shuffles.values().filter(|b| b.is_none()).count() as u32;
        Self {
            instance,
            best_value: representative.map(|b| b.value).unwrap_or(0.0),
            best_level: representative.map(|b| b.level).unwrap_or(0),
            shuffle_values: stats.values().to_vec(),
            mean: stats.mean(),
            stddev: stats.sample_stddev(),
            count: stats.count(),
            fails,
        }
    }
}

/// Aggregated evaluation of one network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Mean of the per-instance means.
    pub mean_over_instances: f64,
    /// Sample standard deviation of the per-instance means.
    pub stddev_over_instances: f64,
    /// Instances with at least one usable shuffle.
    pub instance_count: u32,
    /// Failed (instance, shuffle) runs over all instances.
    pub total_fails: u32,
    /// Lowest per-(instance, shuffle) best value.
    pub min: f64,
    /// Highest per-(instance, shuffle) best value.
    pub max: f64,
    /// Instances without any usable shuffle.
    pub instance_fails: u32,
    /// Mean over all usable (instance, shuffle) best values.
    pub shuffle_mean: f64,
    /// Per-instance shuffle deviations averaged with shuffle-count weights.
    pub shuffle_stddev: f64,
    /// Usable (instance, shuffle) runs.
    pub shuffle_count: u32,
    /// Algorithm params of the winning variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

impl NetworkSummary {
    pub fn from_instances(instances: &[InstanceAggregate], params: Option<String>) -> Self {
        let usable: Vec<&InstanceAggregate> = instances.iter().filter(|i| i.count > 0).collect();
        let means: SampleStats = usable.iter().map(|i| i.mean).collect();
        let pooled: SampleStats = usable
            .iter()
            .flat_map(|i| i.shuffle_values.iter().copied())
            .collect();

        let shuffle_count = pooled.count();
        let shuffle_stddev = if shuffle_count > 0 {
            usable
                .iter()
                .map(|i| i.stddev * f64::from(i.count))
                .sum::<f64>()
                / f64::from(shuffle_count)
        } else {
            0.0
        };

        Self {
            mean_over_instances: means.mean(),
            stddev_over_instances: means.sample_stddev(),
            instance_count: means.count(),
            total_fails: instances.iter().map(|i| i.fails).sum(),
            min: pooled.min(),
            max: pooled.max(),
            instance_fails: (instances.len() - usable.len()) as u32,
            shuffle_mean: pooled.mean(),
            shuffle_stddev,
            shuffle_count,
            params,
        }
    }

    pub fn has_results(&self) -> bool {
        self.instance_count > 0
    }
}

/// Full reduction result for one network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkReduction {
    pub network: String,
    pub instances: Vec<InstanceAggregate>,
    pub summary: NetworkSummary,
}

/// Reduce all records of one network into a [`NetworkReduction`].
///
/// Records are expected to share one network key; params variants among them
/// are reduced separately and the best variant is returned.
pub fn reduce_network(
    network: &str,
    records: &[ScoreRecord],
    expectation: Option<Expectation>,
) -> NetworkReduction {
    let mut variants: BTreeMap<Option<String>, Vec<&ScoreRecord>> = BTreeMap::new();
    for record in records {
        variants
            .entry(record.identity.name.params.clone())
            .or_default()
            .push(record);
    }
    if variants.is_empty() {
        variants.insert(None, Vec::new());
    }

    let reduced: Vec<NetworkReduction> = variants
        .into_iter()
        .map(|(params, recs)| reduce_variant(network, params, &recs, expectation))
        .collect();

    let mut best: Option<&NetworkReduction> = None;
    for candidate in reduced.iter().filter(|r| r.summary.has_results()) {
        match best {
            Some(b) if candidate.summary.mean_over_instances <= b.summary.mean_over_instances => {}
            _ => best = Some(candidate),
        }
    }

    match best {
        Some(b) => {
            tracing::debug!(
                event = "reduce.network",
                network = %network,
                params = b.summary.params.as_deref().unwrap_or(""),
                mean = b.summary.mean_over_instances,
                instances = b.summary.instance_count,
                fails = b.summary.total_fails,
            );
            b.clone()
        }
        None => {
            // Nothing usable in any variant: report every attempted run as failed.
            let instances: Vec<InstanceAggregate> =
                reduced.iter().flat_map(|r| r.instances.clone()).collect();
            let summary = NetworkSummary {
                total_fails: reduced.iter().map(|r| r.summary.total_fails).sum(),
                instance_fails: reduced.iter().map(|r| r.summary.instance_fails).sum(),
                ..NetworkSummary::default()
            };
            tracing::warn!(
                event = "reduce.no_results",
                network = %network,
                fails = summary.total_fails,
                "network has no usable results"
            );
            NetworkReduction {
                network: network.to_string(),
                instances,
                summary,
            }
        }
    }
}

fn reduce_variant(
    network: &str,
    params: Option<String>,
    records: &[&ScoreRecord],
    expectation: Option<Expectation>,
) -> NetworkReduction {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        a.identity
            .run_order(&b.identity)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    // instance -> shuffle -> best level
    let mut grid: BTreeMap<u32, BTreeMap<u32, Option<LevelBest>>> = BTreeMap::new();
    if let Some(exp) = expectation {
        for instance in 0..exp.instances {
            let shuffles = grid.entry(instance).or_default();
            for shuffle in 0..exp.shuffles {
                shuffles.insert(shuffle, None);
            }
        }
    }
    for record in sorted {
        let slot = grid
            .entry(record.identity.instance_index())
            .or_default()
            .entry(record.identity.shuffle_index())
            .or_default();
        if let Some(value) = record.score() {
            // Levels arrive in ascending order: strict `>` keeps the lowest on ties.
            match slot {
                Some(best) if value <= best.value => {}
                _ => {
                    *slot = Some(LevelBest {
                        value,
                        level: record.identity.level,
                    })
                }
            }
        }
    }

    let instances: Vec<InstanceAggregate> = grid
        .iter()
        .map(|(&instance, shuffles)| InstanceAggregate::from_shuffles(instance, shuffles))
        .collect();
    let summary = NetworkSummary::from_instances(&instances, params);

    NetworkReduction {
        network: network.to_string(),
        instances,
        summary,
    }
}
