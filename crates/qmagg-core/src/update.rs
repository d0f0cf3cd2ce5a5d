//! Incremental update control.
//!
//! A summary records the seed its results were produced with. Alongside the
//! summaries a JSON manifest stores a fingerprint of the records behind each
//! network row. On re-invocation [`plan_update`] compares both with the
//! current inputs and decides whether to write nothing, extend the summary
//! with changed networks only, or recompute everything.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{AggError, Result};
use crate::reducer::Expectation;
use crate::score::ScoreRecord;
use crate::summary::WriteMode;

/// SHA-256 over the canonical form of one network's records.
///
/// Independent of record order and file locations; sensitive to every
/// identity, level and value (bitwise), and to the expected grid.
pub fn fingerprint(records: &[ScoreRecord], expectation: Option<Expectation>) -> String {
    let mut lines: Vec<String> = records
        .iter()
        .map(|r| {
            let value = match &r.value {
                Ok(v) => format!("{:016x}", v.to_bits()),
                Err(e) => format!("fail:{e}"),
            };
            format!("{}\t{}\t{}\n", r.identity.name, r.identity.level, value)
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    if let Some(exp) = expectation {
        hasher.update(format!("expect\t{}\t{}\n", exp.instances, exp.shuffles));
    }
    for line in &lines {
        hasher.update(line.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// What the manifest remembers about one aggregated network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkManifest {
    pub fingerprint: String,
    /// Score records folded into the row.
    pub runs: u32,
    /// Distinct instances seen.
    pub instances: u32,
    /// Distinct (instance, shuffle) pairs seen.
    pub shuffles: u32,
}

impl NetworkManifest {
    pub fn from_records(records: &[ScoreRecord], expectation: Option<Expectation>) -> Self {
        let instances: BTreeSet<u32> = records.iter().map(|r| r.identity.instance_index()).collect();
        let shuffles: BTreeSet<(u32, u32)> = records
            .iter()
            .map(|r| (r.identity.instance_index(), r.identity.shuffle_index()))
            .collect();
        Self {
            fingerprint: fingerprint(records, expectation),
            runs: records.len() as u32,
            instances: instances.len() as u32,
            shuffles: shuffles.len() as u32,
        }
    }
}

/// Sidecar persisted next to the summaries of one (algorithm, measure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub seed: u64,
    pub algorithm: String,
    pub measure: String,
    pub generated_at: DateTime<Utc>,
    pub networks: BTreeMap<String, NetworkManifest>,
}

impl Manifest {
    /// `<dir>/<measure>.manifest.json`
    pub fn path_in(dir: &Path, measure: &str) -> PathBuf {
        dir.join(format!("{measure}.manifest.json"))
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AggError::file_io(path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write via temp file and rename; the manifest is derived data and is
    /// not backed up.
    pub fn store(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| AggError::file_io(&dir, e))?;
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| AggError::file_io(&dir, e))?;
        tmp.write_all(&json)
            .map_err(|e| AggError::file_io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| AggError::file_io(path, e.error))?;
        Ok(())
    }
}

/// Caller-controlled update switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub mode: WriteMode,
    /// Recompute every row from raw records, and accept a seed change.
    pub revalue: bool,
}

/// State found on disk before this invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorState {
    /// Summary file used in diagnostics.
    pub path: PathBuf,
    /// Seed recorded by the manifest or, failing that, the summary marker.
    pub seed: Option<u64>,
    pub manifest: Option<Manifest>,
    /// Networks that have a row in every existing summary form.
    pub networks: BTreeSet<String>,
}

/// Decision for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum UpdatePlan {
    /// No summary exists yet.
    Fresh,
    /// Inputs are unchanged; nothing is written.
    NoOp,
    /// Recompute `changed`, reuse the existing rows of `unchanged`.
    Extend {
        changed: BTreeSet<String>,
        unchanged: BTreeSet<String>,
    },
    /// Recompute every input network. Existing rows are dropped when they
    /// were produced with another seed.
    Revalue { discard_existing: bool },
}

impl UpdatePlan {
    pub fn label(&self) -> &'static str {
        match self {
            UpdatePlan::Fresh => "fresh",
            UpdatePlan::NoOp => "noop",
            UpdatePlan::Extend { .. } => "extend",
            UpdatePlan::Revalue { .. } => "revalue",
        }
    }

    /// Whether the summaries will be rewritten.
    pub fn writes(&self) -> bool {
        !matches!(self, UpdatePlan::NoOp)
    }
}

/// Decide how to treat existing summaries given the current inputs.
pub fn plan_update(
    prior: Option<&PriorState>,
    seed: u64,
    flags: UpdateFlags,
    current: &BTreeMap<String, NetworkManifest>,
) -> Result<UpdatePlan> {
    let Some(prior) = prior else {
        return Ok(UpdatePlan::Fresh);
    };

    match prior.seed {
        Some(recorded) if recorded == seed => {}
        Some(recorded) => {
            if flags.revalue {
                return Ok(UpdatePlan::Revalue {
                    discard_existing: true,
                });
            }
            return Err(AggError::SeedMismatch {
                path: prior.path.clone(),
                recorded,
                current: seed,
            });
        }
        None => {
            if flags.revalue {
                return Ok(UpdatePlan::Revalue {
                    discard_existing: true,
                });
            }
            return Err(AggError::UnknownSeed {
                path: prior.path.clone(),
            });
        }
    }

    if flags.revalue {
        return Ok(UpdatePlan::Revalue {
            discard_existing: false,
        });
    }

    let known = prior.manifest.as_ref().map(|m| &m.networks);
    let (unchanged, changed): (BTreeSet<String>, BTreeSet<String>) =
        current.keys().cloned().partition(|network| {
            prior.networks.contains(network)
                && known
                    .and_then(|n| n.get(network))
                    .is_some_and(|old| Some(old) == current.get(network))
        });

    let drops_rows = flags.mode == WriteMode::Replace
        && prior.networks.iter().any(|n| !current.contains_key(n));

    if changed.is_empty() && !drops_rows {
        Ok(UpdatePlan::NoOp)
    } else {
        Ok(UpdatePlan::Extend { changed, unchanged })
    }
}
