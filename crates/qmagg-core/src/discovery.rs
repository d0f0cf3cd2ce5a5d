//! Collection of score records from a result tree.
//!
//! Results of one (algorithm, measure) live under
//! `<results_dir>/<algorithm>/<measure>/` or, when that directory does not
//! exist, directly under `<results_dir>/<algorithm>/`. Two kinds of files are
//! read:
//!
//! - level logs, flat files whose extension is the measure name: one line per
//!   evaluated level, `<value>\t<level>[/<shuffle>]`, `#` starts a comment;
//! - raw evaluator captures: the file holds the evaluator's stdout and an
//!   optional `<file>.status` sidecar holds the job status. Any file of the
//!   measure directory qualifies, and so does a measure-named file whose
//!   layout carries the level (`<name>/<n>.<measure>`,
//!   `<name>/<name>_<n>.<measure>`).
//!
//! Malformed names and lines are skipped with a warning. IO errors on the
//! tree itself are fatal.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::error::{AggError, PathFailure, Result};
use crate::identity::{classify_path, has_level_layout, RunIdentity, RunName, SEP_SHUFFLE};
use crate::metrics::METRICS;
use crate::score::{parse_score, EvaluatorOutput, JobStatus, ScoreRecord};

const STATUS_EXT: &str = "status";
const IGNORED_EXTS: &[&str] = &[STATUS_EXT, "err", "log", "rcp"];

/// A file or line that could not be turned into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub path: PathBuf,
    /// 1-based line for level-log entries.
    pub line: Option<usize>,
    pub reason: PathFailure,
}

/// Records found under one result root.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub root: PathBuf,
    pub records: Vec<ScoreRecord>,
    pub skipped: Vec<Skipped>,
}

impl Discovery {
    /// Records grouped by network key, in key order.
    pub fn by_network(&self) -> BTreeMap<String, Vec<ScoreRecord>> {
        group_by_network(self.records.iter().cloned())
    }

    pub fn parse_failures(&self) -> usize {
        self.records.iter().filter(|r| r.value.is_err()).count()
    }

    fn add_capture(&mut self, path: &Path) -> Result<()> {
        match read_capture(path)? {
            Ok(record) => self.records.push(record),
            Err(reason) => self.skipped.push(Skipped {
                path: path.to_path_buf(),
                line: None,
                reason,
            }),
        }
        Ok(())
    }
}

pub fn group_by_network(
    records: impl IntoIterator<Item = ScoreRecord>,
) -> BTreeMap<String, Vec<ScoreRecord>> {
    let mut groups: BTreeMap<String, Vec<ScoreRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.identity.network_key())
            .or_default()
            .push(record);
    }
    groups
}

/// Directory to scan and whether it is the dedicated measure directory.
pub fn result_root(results_dir: &Path, algorithm: &str, measure: &str) -> (PathBuf, bool) {
    let alg_dir = results_dir.join(algorithm);
    let measure_dir = alg_dir.join(measure);
    if measure_dir.is_dir() {
        (measure_dir, true)
    } else {
        (alg_dir, false)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Walk the result tree of `algorithm` and parse every relevant file.
pub fn discover(results_dir: &Path, algorithm: &str, measure: &str) -> Result<Discovery> {
    let (root, measure_dir) = result_root(results_dir, algorithm, measure);
    let mut found = Discovery {
        root: root.clone(),
        ..Discovery::default()
    };
    if !root.is_dir() {
        tracing::warn!(event = "discovery.missing_root", root = %root.display());
        return Ok(found);
    }

    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match extension(path) {
            Some(ext) if IGNORED_EXTS.contains(&ext) => continue,
            Some(ext) if ext == measure && !has_level_layout(path) => {
                let text = fs::read_to_string(path).map_err(|e| AggError::file_io(path, e))?;
                let (records, skipped) = parse_level_log(path, &text);
                found.records.extend(records);
                found.skipped.extend(skipped);
            }
            Some(ext) if ext == measure => found.add_capture(path)?,
            _ if measure_dir => found.add_capture(path)?,
            _ => continue,
        }
    }

    for record in &found.records {
        METRICS.inc_records();
        if record.value.is_err() {
            METRICS.inc_parse_failures();
        }
    }
    for skip in &found.skipped {
        METRICS.inc_path_failures();
        crate::obs::emit_path_rejected(&skip.path, &skip.reason);
    }
    Ok(found)
}

/// Read one raw evaluator capture and its status sidecar.
fn read_capture(path: &Path) -> Result<std::result::Result<ScoreRecord, PathFailure>> {
    let identity = match classify_path(path) {
        Ok(identity) => identity,
        Err(failure) => return Ok(Err(failure)),
    };
    let stdout = fs::read_to_string(path).map_err(|e| AggError::file_io(path, e))?;
    let status = read_status(path)?;
    let source = path.display().to_string();
    let value = EvaluatorOutput::new(stdout, status).score(&source);
    Ok(Ok(ScoreRecord::new(identity, value, path)))
}

fn status_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(STATUS_EXT);
    path.with_file_name(name)
}

/// Job status from the sidecar; a missing sidecar means success.
fn read_status(path: &Path) -> Result<JobStatus> {
    let sidecar = status_path(path);
    let text = match fs::read_to_string(&sidecar) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JobStatus::Success),
        Err(e) => return Err(AggError::file_io(&sidecar, e)),
    };
    Ok(text.parse().unwrap_or_else(|err: String| {
        tracing::warn!(
            event = "discovery.bad_status",
            path = %sidecar.display(),
            error = %err,
        );
        JobStatus::Failure { exit_code: None }
    }))
}

fn level_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A bare level number, or a level name ending in `_<n>`, `-<n>` or `.<n>`.
    RE.get_or_init(|| Regex::new(r"^(?:.*[_.\-])?(\d+)$").expect("level regex is valid"))
}

/// Parse the level logs of one task.
///
/// The run name is the file stem. A shuffle given on a line applies when the
/// stem carries none. Lines with an unparsable value become failed records;
/// lines with an unusable level or shuffle are skipped.
pub fn parse_level_log(path: &Path, text: &str) -> (Vec<ScoreRecord>, Vec<Skipped>) {
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    let name = match path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PathFailure::NoFileName {
            path: path.display().to_string(),
        })
        .and_then(|stem| stem.parse::<RunName>())
    {
        Ok(name) => name,
        Err(reason) => {
            skipped.push(Skipped {
                path: path.to_path_buf(),
                line: None,
                reason,
            });
            return (records, skipped);
        }
    };

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (value_tok, rest) = match line.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim()),
            None => (line, ""),
        };
        match level_entry(&name, rest, path, idx + 1) {
            Ok(identity) => records.push(ScoreRecord::new(identity, parse_score(value_tok), path)),
            Err(reason) => skipped.push(Skipped {
                path: path.to_path_buf(),
                line: Some(idx + 1),
                reason,
            }),
        }
    }
    (records, skipped)
}

fn level_entry(
    name: &RunName,
    entry: &str,
    path: &Path,
    line: usize,
) -> std::result::Result<RunIdentity, PathFailure> {
    let (level_tok, shuffle_tok) = match entry.split_once('/') {
        Some((l, s)) => (l.trim(), Some(s.trim())),
        None => (entry, None),
    };
    let invalid_level = || PathFailure::InvalidLevel {
        source_desc: format!("{}:{line}", path.display()),
        value: level_tok.to_string(),
    };
    let level = if level_tok.is_empty() {
        0
    } else {
        let caps = level_re().captures(level_tok).ok_or_else(invalid_level)?;
        caps[1].parse().map_err(|_| invalid_level())?
    };

    let mut name = name.clone();
    if let Some(tok) = shuffle_tok.filter(|t| !t.is_empty()) {
        let digits = tok.strip_prefix(SEP_SHUFFLE).unwrap_or(tok);
        let shuffle = digits
            .parse::<u32>()
            .ok()
            .filter(|_| digits.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| PathFailure::InvalidIndex {
                name: entry.to_string(),
                separator: SEP_SHUFFLE,
                value: tok.to_string(),
            })?;
        if name.shuffle.is_none() {
            name = name.with_shuffle(shuffle);
        }
    }
    Ok(RunIdentity::new(name, level))
}
