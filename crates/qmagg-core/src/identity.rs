//! Run identity derived from result file names.
//!
//! Result names follow `<base>[!<params>][#<path_id>][^<instance>][%<shuffle>]`.
//! `#`, `^` and `%` are located from the right and `!` from the left, so the
//! suffixes may come in any order; [`RunName`]'s `Display` always renders the
//! canonical order above.
//!
//! The hierarchy level is not part of the name. It is taken from the file
//! layout, see [`classify_path`].

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PathFailure;

/// Algorithm parameters separator.
pub const SEP_PARAMS: char = '!';
/// Path id separator, distinguishes same-named networks from different dirs.
pub const SEP_PATH_ID: char = '#';
/// Network instance separator.
pub const SEP_INSTANCE: char = '^';
/// Network shuffle separator.
pub const SEP_SHUFFLE: char = '%';

const SEPARATORS: [char; 4] = [SEP_PARAMS, SEP_PATH_ID, SEP_INSTANCE, SEP_SHUFFLE];

/// Parsed result name: network identity plus instance and shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunName {
    pub base_name: String,
    /// Algorithm parameters without the leading `!`.
    pub params: Option<String>,
    /// Opaque path id without the leading `#`.
    pub path_id: Option<String>,
    pub instance: Option<u32>,
    pub shuffle: Option<u32>,
}

impl RunName {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            params: None,
            path_id: None,
            instance: None,
            shuffle: None,
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_path_id(mut self, path_id: impl Into<String>) -> Self {
        self.path_id = Some(path_id.into());
        self
    }

    pub fn with_instance(mut self, instance: u32) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_shuffle(mut self, shuffle: u32) -> Self {
        self.shuffle = Some(shuffle);
        self
    }

    pub fn instance_index(&self) -> u32 {
        self.instance.unwrap_or(0)
    }

    pub fn shuffle_index(&self) -> u32 {
        self.shuffle.unwrap_or(0)
    }

    /// Externally visible network key: base name plus path id.
    ///
    /// Instance, shuffle and params are aggregated away, the path id is not.
    pub fn network_key(&self) -> String {
        match &self.path_id {
            Some(id) => format!("{}{SEP_PATH_ID}{id}", self.base_name),
            None => self.base_name.clone(),
        }
    }
}

impl fmt::Display for RunName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_name)?;
        if let Some(params) = &self.params {
            write!(f, "{SEP_PARAMS}{params}")?;
        }
        if let Some(id) = &self.path_id {
            write!(f, "{SEP_PATH_ID}{id}")?;
        }
        if let Some(instance) = self.instance {
            write!(f, "{SEP_INSTANCE}{instance}")?;
        }
        if let Some(shuffle) = self.shuffle {
            write!(f, "{SEP_SHUFFLE}{shuffle}")?;
        }
        Ok(())
    }
}

impl FromStr for RunName {
    type Err = PathFailure;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        // A separator can't start the name, so the search skips index 0.
        let mut marks: Vec<usize> = Vec::with_capacity(SEPARATORS.len());
        let skip = name.chars().next().map(char::len_utf8).unwrap_or(0);
        let tail = &name[skip..];
        if let Some(pos) = tail.find(SEP_PARAMS) {
            marks.push(pos + skip);
        }
        for sep in [SEP_PATH_ID, SEP_INSTANCE, SEP_SHUFFLE] {
            if let Some(pos) = tail.rfind(sep) {
                marks.push(pos + skip);
            }
        }
        marks.sort_unstable();

        let base_end = marks.first().copied().unwrap_or(name.len());
        let base_name = &name[..base_end];
        if base_name.is_empty() || base_name.starts_with(SEPARATORS) {
            return Err(PathFailure::EmptyBaseName {
                name: name.to_string(),
            });
        }
        if let Some(sep) = base_name.chars().find(|c| SEPARATORS.contains(c)) {
            return Err(PathFailure::DuplicateSeparator {
                name: name.to_string(),
                separator: sep,
            });
        }

        let mut run = RunName::new(base_name);
        for (i, &start) in marks.iter().enumerate() {
            let end = marks.get(i + 1).copied().unwrap_or(name.len());
            // Separators are ASCII, the value starts right after one byte.
            let sep = name[start..].chars().next().unwrap_or(SEP_PARAMS);
            let value = &name[start + 1..end];
            if value.is_empty() {
                return Err(PathFailure::EmptySuffix {
                    name: name.to_string(),
                    separator: sep,
                });
            }
            // Params may repeat '!' (`!k3!r0.5`); nothing else may repeat.
            if let Some(stray) = value
                .chars()
                .find(|c| SEPARATORS.contains(c) && !(sep == SEP_PARAMS && *c == SEP_PARAMS))
            {
                return Err(PathFailure::DuplicateSeparator {
                    name: name.to_string(),
                    separator: stray,
                });
            }
            match sep {
                SEP_PARAMS => run.params = Some(value.to_string()),
                SEP_PATH_ID => run.path_id = Some(value.to_string()),
                SEP_INSTANCE => run.instance = Some(parse_index(name, sep, value)?),
                _ => run.shuffle = Some(parse_index(name, sep, value)?),
            }
        }
        Ok(run)
    }
}

fn parse_index(name: &str, separator: char, value: &str) -> std::result::Result<u32, PathFailure> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathFailure::InvalidIndex {
            name: name.to_string(),
            separator,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| PathFailure::InvalidIndex {
        name: name.to_string(),
        separator,
        value: value.to_string(),
    })
}

/// Full identity of one evaluation: the run name plus the hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    pub name: RunName,
    /// 0 for flat, non-hierarchical results.
    pub level: u32,
}

impl RunIdentity {
    pub fn new(name: RunName, level: u32) -> Self {
        Self { name, level }
    }

    pub fn network_key(&self) -> String {
        self.name.network_key()
    }

    pub fn instance_index(&self) -> u32 {
        self.name.instance_index()
    }

    pub fn shuffle_index(&self) -> u32 {
        self.name.shuffle_index()
    }

    /// Ordering used wherever records must be processed reproducibly:
    /// params, instance, shuffle, level.
    pub fn run_order(&self, other: &Self) -> Ordering {
        self.name
            .params
            .cmp(&other.name.params)
            .then(self.instance_index().cmp(&other.instance_index()))
            .then(self.shuffle_index().cmp(&other.shuffle_index()))
            .then(self.level.cmp(&other.level))
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (level {})", self.name, self.level)
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_level(source: &Path, value: &str) -> std::result::Result<u32, PathFailure> {
    value.parse().map_err(|_| PathFailure::InvalidLevel {
        source_desc: source.display().to_string(),
        value: value.to_string(),
    })
}

/// Whether the file layout itself carries the level: a purely numeric stem,
/// or `<name>/<name>_<n>.<ext>` inside a per-network level directory.
pub fn has_level_layout(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    if is_numeric(stem) {
        return true;
    }
    let parent_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str());
    matches!(
        (stem.rsplit_once('_'), parent_name),
        (Some((prefix, tail)), Some(dir)) if is_numeric(tail) && prefix == dir
    )
}

/// Derive a [`RunIdentity`] from a result file path.
///
/// Level layouts:
/// - `<dir>/<name>/<level>.<ext>`: a purely numeric stem is the level and the
///   parent directory carries the run name;
/// - `<dir>/<name>/<name>_<level>.<ext>`: per-network level directory;
/// - `<dir>/<name>.<ext>`: flat result, level 0.
pub fn classify_path(path: &Path) -> std::result::Result<RunIdentity, PathFailure> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PathFailure::NoFileName {
            path: path.display().to_string(),
        })?;
    let parent_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str());

    if is_numeric(stem) {
        let dir = parent_name.ok_or_else(|| PathFailure::OrphanLevel {
            path: path.display().to_string(),
        })?;
        let level = parse_level(path, stem)?;
        return Ok(RunIdentity::new(dir.parse()?, level));
    }

    if let (Some((prefix, tail)), Some(dir)) = (stem.rsplit_once('_'), parent_name) {
        if is_numeric(tail) && prefix == dir {
            let level = parse_level(path, tail)?;
            return Ok(RunIdentity::new(prefix.parse()?, level));
        }
    }

    Ok(RunIdentity::new(stem.parse()?, 0))
}
