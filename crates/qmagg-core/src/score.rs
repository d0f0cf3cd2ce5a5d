//! Score extraction from raw evaluator output.
//!
//! Evaluators print their final score as the trailing token of the last
//! non-empty line; anything printed before it (progress, warnings, a
//! `mod: ` prefix) is ignored.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseFailure;
use crate::identity::RunIdentity;

/// One evaluated run: where it came from and what it scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub identity: RunIdentity,
    pub value: std::result::Result<f64, ParseFailure>,
    pub source_path: PathBuf,
}

impl ScoreRecord {
    pub fn new(
        identity: RunIdentity,
        value: std::result::Result<f64, ParseFailure>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identity,
            value,
            source_path: source_path.into(),
        }
    }

    /// The score if it was parsed successfully.
    pub fn score(&self) -> Option<f64> {
        self.value.as_ref().ok().copied()
    }
}

/// Extract one finite score from an evaluator's stdout.
pub fn parse_score(text: &str) -> std::result::Result<f64, ParseFailure> {
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(ParseFailure::Empty)?;
    // A non-empty trimmed line always has at least one token.
    let token = line.split_whitespace().last().unwrap_or(line);

    let value: f64 = token.parse().map_err(|_| ParseFailure::NotNumeric {
        token: token.to_string(),
    })?;
    if !value.is_finite() {
        return Err(ParseFailure::NonFinite {
            token: token.to_string(),
        });
    }
    Ok(value)
}

/// Completion status reported by the job scheduler for one evaluator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure { exit_code: Option<i32> },
    Timeout,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => f.write_str("success"),
            JobStatus::Failure {
                exit_code: Some(code),
            } => write!(f, "failure (exit {code})"),
            JobStatus::Failure { exit_code: None } => f.write_str("failure"),
            JobStatus::Timeout => f.write_str("timeout"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// Accepts `success`/`ok`, `failure`/`failed`, `timeout`, or a bare exit code.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "success" | "ok" | "done" => return Ok(JobStatus::Success),
            "failure" | "failed" | "fail" | "error" => {
                return Ok(JobStatus::Failure { exit_code: None })
            }
            "timeout" | "timedout" | "timed_out" => return Ok(JobStatus::Timeout),
            _ => {}
        }
        match s.parse::<i32>() {
            Ok(0) => Ok(JobStatus::Success),
            Ok(code) => Ok(JobStatus::Failure {
                exit_code: Some(code),
            }),
            Err(_) => Err(format!("unrecognised job status: {s:?}")),
        }
    }
}

/// Captured stdout of one evaluator run together with its job status.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorOutput {
    pub stdout: String,
    pub status: JobStatus,
}

impl EvaluatorOutput {
    pub fn new(stdout: impl Into<String>, status: JobStatus) -> Self {
        Self {
            stdout: stdout.into(),
            status,
        }
    }

    /// Parse the score, tolerating crashed or timed-out evaluators that still
    /// printed one.
    pub fn score(&self, source: &str) -> std::result::Result<f64, ParseFailure> {
        let parsed = parse_score(&self.stdout);
        if !self.status.is_success() {
            match &parsed {
                Ok(value) => tracing::warn!(
                    event = "score.unclean_exit",
                    source = %source,
                    status = %self.status,
                    value = *value,
                    "evaluator did not exit cleanly, using its printed score"
                ),
                Err(err) => tracing::warn!(
                    event = "score.unclean_exit",
                    source = %source,
                    status = %self.status,
                    error = %err,
                    "evaluator did not exit cleanly and printed no score"
                ),
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number() {
        assert_eq!(parse_score("0.414481"), Ok(0.414481));
        assert_eq!(parse_score("0.5\n"), Ok(0.5));
        assert_eq!(parse_score("  1e-3 \r\n"), Ok(0.001));
    }

    #[test]
    fn trailing_token_of_last_line_wins() {
        let out = "progress 0.1\nprogress 0.2\nNMI_max:\t0.83\n\n";
        assert_eq!(parse_score(out), Ok(0.83));
    }

    #[test]
    fn prefixed_modularity_line() {
        assert_eq!(parse_score("mod: 0.4198"), Ok(0.4198));
    }

    #[test]
    fn empty_and_blank_output_fail() {
        assert_eq!(parse_score(""), Err(ParseFailure::Empty));
        assert_eq!(parse_score("\n  \n\t\n"), Err(ParseFailure::Empty));
    }

    #[test]
    fn non_numeric_trailing_token_fails() {
        assert_eq!(
            parse_score("0.7\nSegmentation fault"),
            Err(ParseFailure::NotNumeric {
                token: "fault".to_string()
            })
        );
    }

    #[test]
    fn non_finite_values_fail() {
        assert!(matches!(
            parse_score("nan"),
            Err(ParseFailure::NonFinite { .. })
        ));
        assert!(matches!(
            parse_score("value: inf"),
            Err(ParseFailure::NonFinite { .. })
        ));
    }

    #[test]
    fn job_status_parsing() {
        assert_eq!("success".parse::<JobStatus>(), Ok(JobStatus::Success));
        assert_eq!("0".parse::<JobStatus>(), Ok(JobStatus::Success));
        assert_eq!("Timeout\n".parse::<JobStatus>(), Ok(JobStatus::Timeout));
        assert_eq!(
            "139".parse::<JobStatus>(),
            Ok(JobStatus::Failure {
                exit_code: Some(139)
            })
        );
        assert!("maybe".parse::<JobStatus>().is_err());
    }

    #[test]
    fn crashed_evaluator_score_still_used() {
        let out = EvaluatorOutput::new(
            "warning: dangling node\n0.61\n",
            JobStatus::Failure {
                exit_code: Some(1),
            },
        );
        assert_eq!(out.score("karate.nmi"), Ok(0.61));
    }

    #[test]
    fn timed_out_evaluator_without_score_fails() {
        let out = EvaluatorOutput::new("", JobStatus::Timeout);
        assert_eq!(out.score("karate.nmi"), Err(ParseFailure::Empty));
    }
}
