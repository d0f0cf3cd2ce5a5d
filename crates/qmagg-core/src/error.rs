//! Error taxonomy for quality-measure aggregation.
//!
//! [`ParseFailure`] and [`PathFailure`] are local: they are counted and
//! logged, and never abort the aggregation of sibling runs. [`AggError`] is
//! fatal for the (algorithm, measure) pair being aggregated.

use std::path::PathBuf;

/// A single evaluator output could not be turned into a score.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("evaluator output is empty")]
    Empty,

    #[error("trailing token is not a number: {token:?}")]
    NotNumeric { token: String },

    #[error("score is not finite: {token:?}")]
    NonFinite { token: String },
}

/// A result file name or location does not follow the naming grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathFailure {
    #[error("path has no file name: {path}")]
    NoFileName { path: String },

    #[error("network base name is empty in {name:?}")]
    EmptyBaseName { name: String },

    #[error("separator '{separator}' has an empty value in {name:?}")]
    EmptySuffix { name: String, separator: char },

    #[error("separator '{separator}' carries an invalid index {value:?} in {name:?}")]
    InvalidIndex {
        name: String,
        separator: char,
        value: String,
    },

    #[error("separator '{separator}' occurs more than once in {name:?}")]
    DuplicateSeparator { name: String, separator: char },

    #[error("numeric level file {path} has no parent directory naming the network")]
    OrphanLevel { path: String },

    #[error("invalid level {value:?} in {source_desc}")]
    InvalidLevel { source_desc: String, value: String },
}

/// Fatal aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum AggError {
    #[error("malformed summary file {}:{line}: {reason}", path.display())]
    MalformedSummary {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "seed mismatch for {}: summary was produced with seed {recorded}, \
         current seed is {current}; pass revalue to recompute",
        path.display()
    )]
    SeedMismatch {
        path: PathBuf,
        recorded: u64,
        current: u64,
    },

    #[error(
        "summary {} carries no seed marker; pass revalue to recompute",
        path.display()
    )]
    UnknownSeed { path: PathBuf },

    #[error(
        "no networks found to aggregate for {algorithm}/{measure} under {}",
        dir.display()
    )]
    NothingToAggregate {
        algorithm: String,
        measure: String,
        dir: PathBuf,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("io error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggError {
    /// Wrap an io error with the path it happened on.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AggError::FileIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggError>;
