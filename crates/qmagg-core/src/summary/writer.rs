//! Crash-safe persistence of summary files.
//!
//! New content goes to a temp file in the target directory. The previous
//! file is then copied to a timestamped backup and the temp file is renamed
//! over the target, so the old summary stays intact until the replacement
//! is complete. Backups are created exclusively and never overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use super::{SummaryForm, SummaryKey, SummaryTable};
use crate::error::{AggError, Result};

const BACKUP_STAMP_FMT: &str = "%Y%m%dT%H%M%SZ";

/// Backup file name for `path` at `now`, before collision suffixing:
/// `<name>.<YYYYmmddTHHMMSSZ>`.
pub fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}", now.format(BACKUP_STAMP_FMT)));
    path.with_file_name(name)
}

/// Copy `path` to a fresh backup file, suffixing `-1`, `-2`, ... on collision.
fn backup_existing(path: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let base = backup_path(path, now);
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            base.clone()
        } else {
            let mut name = base.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(format!("-{attempt}"));
            base.with_file_name(name)
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut dst) => {
                let mut src = File::open(path).map_err(|e| AggError::file_io(path, e))?;
                io::copy(&mut src, &mut dst).map_err(|e| AggError::file_io(&candidate, e))?;
                dst.sync_all()
                    .map_err(|e| AggError::file_io(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(AggError::file_io(&candidate, e)),
        }
    }
}

/// Atomically replace `path` with `content`, backing up any previous file.
///
/// Returns the backup path when a previous file existed.
pub fn write_atomic(path: &Path, content: &str, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| AggError::file_io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| AggError::file_io(&dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| AggError::file_io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AggError::file_io(tmp.path(), e))?;

    let backup = if path.exists() {
        Some(backup_existing(path, now)?)
    } else {
        None
    };

    tmp.persist(path)
        .map_err(|e| AggError::file_io(path, e.error))?;
    Ok(backup)
}

/// One summary file on disk: its location, form and (algorithm, measure).
#[derive(Debug, Clone)]
pub struct SummaryFile {
    path: PathBuf,
    form: SummaryForm,
    key: SummaryKey,
}

impl SummaryFile {
    pub fn new(path: impl Into<PathBuf>, form: SummaryForm, key: SummaryKey) -> Self {
        Self {
            path: path.into(),
            form,
            key,
        }
    }

    /// `<dir>/<measure>.<res|resx>`
    pub fn in_dir(dir: &Path, form: SummaryForm, key: SummaryKey) -> Self {
        let path = dir.join(format!("{}.{}", key.measure, form.extension()));
        Self::new(path, form, key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn form(&self) -> SummaryForm {
        self.form
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and parse the file, `None` when it does not exist.
    pub fn load(&self) -> Result<Option<SummaryTable>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AggError::file_io(&self.path, e)),
        };
        SummaryTable::parse(&text, self.form, &self.path).map(Some)
    }

    /// Render `table` and persist it atomically. Returns the backup path, if any.
    pub fn store(&self, table: &SummaryTable, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let content = table.render(self.form, &self.key);
        let backup = write_atomic(&self.path, &content, now)?;
        crate::obs::emit_summary_written(&self.path, table.rows.len(), backup.as_deref());
        if backup.is_some() {
            crate::metrics::METRICS.inc_backups();
        }
        Ok(backup)
    }
}
