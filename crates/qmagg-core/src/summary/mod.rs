//! Per-(algorithm, measure) summary tables.
//!
//! A summary holds one row per network. Two textual forms exist:
//!
//! - terse: `<network>\t<mean>`
//! - extended: the network on its own line followed by an indented
//!   `<algorithm>>\t<measure>: <mean> (<min> .. <max>), s: ...` line
//!
//! Both start with a `# --- <UTC time> (seed: <seed>) ---` marker which
//! records the seed the results were produced with.

pub mod writer;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AggError, Result};
use crate::reducer::NetworkSummary;

pub use writer::{backup_path, write_atomic, SummaryFile};

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Textual form of a summary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryForm {
    Terse,
    Extended,
}

impl SummaryForm {
    /// File extension of this form.
    pub fn extension(&self) -> &'static str {
        match self {
            SummaryForm::Terse => "res",
            SummaryForm::Extended => "resx",
        }
    }
}

/// How new rows combine with an existing summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Content comes from the current invocation only.
    #[default]
    Replace,
    /// Rows of networks not in the current invocation are kept.
    Merge,
}

/// Identifies which summary a table belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub algorithm: String,
    pub measure: String,
}

impl SummaryKey {
    pub fn new(algorithm: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            measure: measure.into(),
        }
    }
}

/// In-memory summary: header marker plus network rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub generated_at: DateTime<Utc>,
    pub seed: Option<u64>,
    pub rows: BTreeMap<String, NetworkSummary>,
}

impl SummaryTable {
    pub fn new(generated_at: DateTime<Utc>, seed: Option<u64>) -> Self {
        Self {
            generated_at,
            seed,
            rows: BTreeMap::new(),
        }
    }

    /// Insert or replace the row of `network`.
    pub fn upsert(&mut self, network: impl Into<String>, summary: NetworkSummary) {
        self.rows.insert(network.into(), summary);
    }

    /// Combine an existing table with freshly reduced rows.
    ///
    /// In [`WriteMode::Merge`] rows of networks absent from `updates` survive;
    /// in [`WriteMode::Replace`] only `updates` are kept.
    pub fn merged(
        existing: Option<&SummaryTable>,
        updates: BTreeMap<String, NetworkSummary>,
        mode: WriteMode,
        generated_at: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut table = SummaryTable::new(generated_at, Some(seed));
        if let (WriteMode::Merge, Some(old)) = (mode, existing) {
            table.rows = old.rows.clone();
        }
        table.rows.extend(updates);
        table
    }

    pub fn render(&self, form: SummaryForm, key: &SummaryKey) -> String {
        match form {
            SummaryForm::Terse => self.render_terse(key),
            SummaryForm::Extended => self.render_extended(key),
        }
    }

    fn header_line(&self) -> String {
        let stamp = self.generated_at.format(TIMESTAMP_FMT);
        match self.seed {
            Some(seed) => format!("# --- {stamp} (seed: {seed}) ---\n"),
            None => format!("# --- {stamp} ---\n"),
        }
    }

    fn render_terse(&self, key: &SummaryKey) -> String {
        let mut out = self.header_line();
        let _ = writeln!(out, "# <network>\t{}", key.measure);
        for (network, s) in &self.rows {
            let _ = writeln!(out, "{network}\t{}", fmt_num(s.mean_over_instances));
        }
        out
    }

    fn render_extended(&self, key: &SummaryKey) -> String {
        let mut out = self.header_line();
        for (network, s) in &self.rows {
            let label = match &s.params {
                Some(p) => format!("{} ({p})", key.algorithm),
                None => key.algorithm.clone(),
            };
            let _ = writeln!(out, "{network}");
            let _ = writeln!(
                out,
                "\t{label}>\t{}: {} ({} .. {}), s: {}, count: {}, fails: {}, \
                 d(shuf): {}, s(shuf): {}, count(shuf): {}, fails(shuf): {}",
                key.measure,
                fmt_num(s.mean_over_instances),
                fmt_num(s.min),
                fmt_num(s.max),
                fmt_num(s.stddev_over_instances),
                s.instance_count,
                s.instance_fails,
                fmt_num(s.shuffle_mean),
                fmt_num(s.shuffle_stddev),
                s.shuffle_count,
                s.total_fails,
            );
        }
        out
    }

    /// Parse a summary in the given form. `path` is used for diagnostics only.
    pub fn parse(text: &str, form: SummaryForm, path: &Path) -> Result<Self> {
        match form {
            SummaryForm::Terse => parse_terse(text, path),
            SummaryForm::Extended => parse_extended(text, path),
        }
    }
}

/// Round to 6 decimals and drop trailing zeros: `0.7`, `0.414481`, `0`.
pub fn fmt_num(value: f64) -> String {
    let mut s = format!("{value:.6}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^# --- (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})(?: \(seed: (\d+)\))? -+$")
            .expect("header regex is valid")
    })
}

fn extended_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\t(?P<label>[^\t]+)>\t(?P<measure>[^:]+): (?P<mean>\S+) \((?P<min>\S+) \.\. (?P<max>\S+)\), ",
            r"s: (?P<sd>\S+), count: (?P<count>\d+), fails: (?P<fails>\d+), ",
            r"d\(shuf\): (?P<smean>\S+), s\(shuf\): (?P<ssd>\S+), ",
            r"count\(shuf\): (?P<scount>\d+), fails\(shuf\): (?P<sfails>\d+)$",
        ))
        .expect("extended row regex is valid")
    })
}

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> AggError {
    AggError::MalformedSummary {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

/// Parses a `# --- ... ---` marker, `None` for any other line.
fn parse_header(line: &str) -> Option<(DateTime<Utc>, Option<u64>)> {
    let caps = header_re().captures(line)?;
    let stamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FMT)
        .ok()?
        .and_utc();
    let seed = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((stamp, seed))
}

fn parse_terse(text: &str, path: &Path) -> Result<SummaryTable> {
    let mut table = SummaryTable::new(DateTime::<Utc>::default(), None);
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if let Some((stamp, seed)) = parse_header(line) {
                table.generated_at = stamp;
                table.seed = seed;
            }
            continue;
        }
        let (network, value) = line
            .split_once('\t')
            .ok_or_else(|| malformed(path, idx + 1, "expected <network>\\t<value>"))?;
        let mean: f64 = value
            .trim()
            .parse()
            .map_err(|_| malformed(path, idx + 1, format!("invalid value {value:?}")))?;
        table.upsert(
            network,
            NetworkSummary {
                mean_over_instances: mean,
                ..NetworkSummary::default()
            },
        );
    }
    Ok(table)
}

fn parse_extended(text: &str, path: &Path) -> Result<SummaryTable> {
    let mut table = SummaryTable::new(DateTime::<Utc>::default(), None);
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if let Some((stamp, seed)) = parse_header(line) {
                table.generated_at = stamp;
                table.seed = seed;
            }
            continue;
        }
        if !line.starts_with('\t') {
            if let Some((at, network)) = pending.take() {
                return Err(malformed(path, at, format!("network {network:?} has no row")));
            }
            pending = Some((idx + 1, line.to_string()));
            continue;
        }
        let (_, network) = pending
            .take()
            .ok_or_else(|| malformed(path, idx + 1, "evaluation row without network"))?;
        let summary = parse_extended_row(line).ok_or_else(|| {
            malformed(path, idx + 1, "row does not match the extended format")
        })?;
        table.upsert(network, summary);
    }
    if let Some((at, network)) = pending {
        return Err(malformed(path, at, format!("network {network:?} has no row")));
    }
    Ok(table)
}

fn parse_extended_row(line: &str) -> Option<NetworkSummary> {
    let caps = extended_row_re().captures(line)?;
    let num = |name: &str| caps[name].parse::<f64>().ok();
    let int = |name: &str| caps[name].parse::<u32>().ok();
    let label = &caps["label"];
    let params = label
        .strip_suffix(')')
        .and_then(|l| l.split_once(" ("))
        .map(|(_, p)| p.to_string());
    Some(NetworkSummary {
        mean_over_instances: num("mean")?,
        stddev_over_instances: num("sd")?,
        instance_count: int("count")?,
        total_fails: int("sfails")?,
        min: num("min")?,
        max: num("max")?,
        instance_fails: int("fails")?,
        shuffle_mean: num("smean")?,
        shuffle_stddev: num("ssd")?,
        shuffle_count: int("scount")?,
        params,
    })
}
