//! Explicit aggregation configuration.
//!
//! [`AggConfig`] describes one (algorithm, measure) aggregation. A
//! [`RunConfig`] TOML file describes a batch: every listed algorithm crossed
//! with every listed measure, sharing directories, seed and update flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AggError, Result};
use crate::reducer::{Expectation, MAX_EXPECTED_RUNS};
use crate::summary::{SummaryForm, SummaryKey, WriteMode};
use crate::update::UpdateFlags;

/// Which summary forms to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormSelection {
    Terse,
    Extended,
    #[default]
    Both,
}

impl FormSelection {
    pub fn forms(&self) -> Vec<SummaryForm> {
        match self {
            FormSelection::Terse => vec![SummaryForm::Terse],
            FormSelection::Extended => vec![SummaryForm::Extended],
            FormSelection::Both => vec![SummaryForm::Terse, SummaryForm::Extended],
        }
    }
}

impl FromStr for FormSelection {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terse" | "res" => Ok(FormSelection::Terse),
            "extended" | "resx" => Ok(FormSelection::Extended),
            "both" | "all" => Ok(FormSelection::Both),
            other => Err(AggError::Config(format!(
                "unknown summary form '{other}' (expected terse, extended or both)"
            ))),
        }
    }
}

impl FromStr for WriteMode {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(WriteMode::Replace),
            "merge" => Ok(WriteMode::Merge),
            other => Err(AggError::Config(format!(
                "unknown write mode '{other}' (expected replace or merge)"
            ))),
        }
    }
}

/// Everything one aggregation needs; nothing is read from globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggConfig {
    /// Root holding `<algorithm>/[<measure>/]...` result trees.
    pub results_dir: PathBuf,
    /// Summaries land in `<output_dir>/<algorithm>/`.
    pub output_dir: PathBuf,
    pub algorithm: String,
    pub measure: String,
    pub seed: u64,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub revalue: bool,
    #[serde(default)]
    pub forms: FormSelection,
    #[serde(default)]
    pub expectation: Option<Expectation>,
}

impl AggConfig {
    pub fn new(
        results_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        algorithm: impl Into<String>,
        measure: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            results_dir: results_dir.into(),
            output_dir: output_dir.into(),
            algorithm: algorithm.into(),
            measure: measure.into(),
            seed,
            mode: WriteMode::default(),
            revalue: false,
            forms: FormSelection::default(),
            expectation: None,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_revalue(mut self, revalue: bool) -> Self {
        self.revalue = revalue;
        self
    }

    pub fn with_forms(mut self, forms: FormSelection) -> Self {
        self.forms = forms;
        self
    }

    pub fn with_expectation(mut self, expectation: Option<Expectation>) -> Self {
        self.expectation = expectation;
        self
    }

    pub fn key(&self) -> SummaryKey {
        SummaryKey::new(&self.algorithm, &self.measure)
    }

    pub fn flags(&self) -> UpdateFlags {
        UpdateFlags {
            mode: self.mode,
            revalue: self.revalue,
        }
    }

    /// Directory holding the summaries and manifest of this algorithm.
    pub fn summary_dir(&self) -> PathBuf {
        self.output_dir.join(&self.algorithm)
    }

    pub fn validate(&self) -> Result<()> {
        check_component("algorithm", &self.algorithm)?;
        check_component("measure", &self.measure)?;
        if let Some(exp) = self.expectation {
            if exp.instances == 0 || exp.shuffles == 0 {
                return Err(AggError::Config(format!(
                    "expectation must be at least 1x1, got {}x{}",
                    exp.instances, exp.shuffles
                )));
            }
            match exp.checked_runs() {
                Some(runs) if runs <= MAX_EXPECTED_RUNS => {}
                _ => {
                    return Err(AggError::Config(format!(
                        "expectation {}x{} exceeds {MAX_EXPECTED_RUNS} runs",
                        exp.instances, exp.shuffles
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Algorithm and measure names become path components.
fn check_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AggError::Config(format!("{field} must not be empty")));
    }
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(AggError::Config(format!(
            "{field} '{value}' must be a single path component"
        )));
    }
    Ok(())
}

/// Batch description loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub results_dir: PathBuf,
    pub output_dir: PathBuf,
    pub algorithms: Vec<String>,
    pub measures: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Read the seed from this file when `seed` is not given.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub revalue: bool,
    #[serde(default)]
    pub forms: FormSelection,
    #[serde(default)]
    pub expectation: Option<Expectation>,
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| AggError::file_io(path, e))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// The explicit seed, else the content of `seed_file`.
    pub fn resolve_seed(&self) -> Result<u64> {
        match (self.seed, &self.seed_file) {
            (Some(seed), _) => Ok(seed),
            (None, Some(file)) => read_seed_file(file),
            (None, None) => Err(AggError::Config(
                "either seed or seed_file must be set".to_string(),
            )),
        }
    }

    /// One [`AggConfig`] per (algorithm, measure), algorithms outermost.
    pub fn jobs(&self) -> Result<Vec<AggConfig>> {
        if self.algorithms.is_empty() || self.measures.is_empty() {
            return Err(AggError::Config(
                "at least one algorithm and one measure are required".to_string(),
            ));
        }
        let seed = self.resolve_seed()?;
        let mut jobs = Vec::with_capacity(self.algorithms.len() * self.measures.len());
        for algorithm in &self.algorithms {
            for measure in &self.measures {
                let job = AggConfig::new(
                    &self.results_dir,
                    &self.output_dir,
                    algorithm,
                    measure,
                    seed,
                )
                .with_mode(self.mode)
                .with_revalue(self.revalue)
                .with_forms(self.forms)
                .with_expectation(self.expectation);
                job.validate()?;
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

/// Read a seed file: the first non-empty line that is not a `#` comment.
pub fn read_seed_file(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path).map_err(|e| AggError::file_io(path, e))?;
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or_else(|| AggError::Config(format!("seed file {} is empty", path.display())))?;
    line.parse().map_err(|_| {
        AggError::Config(format!(
            "seed file {} holds '{line}', expected an unsigned integer",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: &str = r#"
results_dir = "results"
output_dir = "aggregated"
algorithms = ["daoc", "louvain"]
measures = ["nmi", "mod"]
seed = 42
mode = "merge"
forms = "extended"

[expectation]
instances = 3
shuffles = 2
"#;

    #[test]
    fn batch_expands_algorithms_by_measures() {
        let cfg = RunConfig::from_toml_str(BATCH).unwrap();
        let jobs = cfg.jobs().unwrap();
        let pairs: Vec<(String, String)> = jobs
            .iter()
            .map(|j| (j.algorithm.clone(), j.measure.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("daoc".into(), "nmi".into()),
                ("daoc".into(), "mod".into()),
                ("louvain".into(), "nmi".into()),
                ("louvain".into(), "mod".into()),
            ]
        );
        assert!(jobs.iter().all(|j| j.seed == 42 && j.mode == WriteMode::Merge));
        assert_eq!(jobs[0].forms.forms(), vec![SummaryForm::Extended]);
        assert_eq!(jobs[0].expectation.unwrap().runs(), 6);
    }

    #[test]
    fn defaults_apply() {
        let cfg = RunConfig::from_toml_str(
            "results_dir = \"r\"\noutput_dir = \"o\"\nalgorithms = [\"a\"]\nmeasures = [\"m\"]\nseed = 1\n",
        )
        .unwrap();
        assert_eq!(cfg.mode, WriteMode::Replace);
        assert_eq!(cfg.forms, FormSelection::Both);
        assert!(!cfg.revalue);
        assert!(cfg.expectation.is_none());
    }

    #[test]
    fn missing_seed_is_rejected() {
        let cfg = RunConfig::from_toml_str(
            "results_dir = \"r\"\noutput_dir = \"o\"\nalgorithms = [\"a\"]\nmeasures = [\"m\"]\n",
        )
        .unwrap();
        assert!(matches!(cfg.jobs(), Err(AggError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_file_error() {
        let err = RunConfig::from_toml_str("algorithms = [").unwrap_err();
        assert!(matches!(err, AggError::ConfigFile(_)));
    }

    #[test]
    fn seed_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.txt");
        fs::write(&path, "# benchmark seed\n\n  1234567 \n").unwrap();
        assert_eq!(read_seed_file(&path).unwrap(), 1234567);

        fs::write(&path, "not-a-seed\n").unwrap();
        assert!(matches!(read_seed_file(&path), Err(AggError::Config(_))));
    }

    #[test]
    fn seed_file_used_when_seed_absent() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        fs::write(&seed, "77\n").unwrap();
        let text = format!(
            "results_dir = \"r\"\noutput_dir = \"o\"\nalgorithms = [\"a\"]\nmeasures = [\"m\"]\nseed_file = {:?}\n",
            seed.display().to_string()
        );
        let cfg = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg.resolve_seed().unwrap(), 77);
    }

    #[test]
    fn path_like_names_are_rejected() {
        let cfg = AggConfig::new("r", "o", "../daoc", "nmi", 1);
        assert!(cfg.validate().is_err());
        let cfg = AggConfig::new("r", "o", "daoc", "", 1);
        assert!(cfg.validate().is_err());
        let cfg = AggConfig::new("r", "o", "daoc", "nmi", 1).with_expectation(Some(Expectation {
            instances: 0,
            shuffles: 1,
        }));
        assert!(cfg.validate().is_err());
        assert!(AggConfig::new("r", "o", "daoc", "nmi", 1).validate().is_ok());
    }

    #[test]
    fn oversized_expectation_is_rejected() {
        let grid = |instances, shuffles| {
            AggConfig::new("r", "o", "daoc", "nmi", 1)
                .with_expectation(Some(Expectation { instances, shuffles }))
                .validate()
        };
        assert!(matches!(grid(100_000, 100_000), Err(AggError::Config(_))));
        assert!(matches!(grid(2_000, 1_000), Err(AggError::Config(_))));
        assert!(grid(1_000, 1_000).is_ok());
    }

    #[test]
    fn mode_and_forms_parse_case_insensitively() {
        assert_eq!("Merge".parse::<WriteMode>().unwrap(), WriteMode::Merge);
        assert_eq!("resx".parse::<FormSelection>().unwrap(), FormSelection::Extended);
        assert!("sometimes".parse::<WriteMode>().is_err());
    }
}
