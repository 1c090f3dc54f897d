//! Per-job and per-run outcome types.
//!
//! A [`JobResult`] is created once its job's pipeline finishes or aborts
//! and is immutable afterwards; the [`RunReport`] owns the results of one
//! invocation in input order.

use crate::backup::pipeline::StageKind;
use crate::backup::result_error::error::Error;
use chrono::{DateTime, Utc};
use derive_more::Display;
use getset::Getters;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{self, Formatter};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[display("success")]
    Success,
    /// The data-moving stage completed but a later stage did not: data
    /// moved, just not fully as specified.
    #[display("partial failure")]
    PartialFailure,
    #[display("failure")]
    Failure,
}

/// Outcome of one executed stage: exit code (None when killed by a
/// signal or never started) and captured stderr.
#[derive(Clone, Debug, Serialize)]
pub struct StageResult {
    pub kind: StageKind,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The failure as an [`Error::Stage`], for rendering and propagation.
    pub fn to_error(&self) -> Error {
        Error::Stage {
            kind: self.kind,
            exit_code: self.exit_code,
            stderr: self.stderr.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Getters)]
#[getset(get = "pub")]
pub struct JobResult {
    job_name: Arc<str>,
    status: JobStatus,
    stage_results: Vec<StageResult>,
    /// Error text for failures that never produced a stage result
    /// (compilation errors, cancellation before launch).
    error: Option<String>,
}

impl JobResult {
    pub fn new(job_name: Arc<str>, status: JobStatus, stage_results: Vec<StageResult>) -> Self {
        JobResult {
            job_name,
            status,
            stage_results,
            error: None,
        }
    }

    /// A job that failed before its pipeline could run at all.
    pub fn aborted(job_name: Arc<str>, error: &Error) -> Self {
        JobResult {
            job_name,
            status: JobStatus::Failure,
            stage_results: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// The first failing stage, if the pipeline got far enough to run one.
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| !r.is_success())
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job_name, self.status)?;
        if let Some(failure) = self.first_failure() {
            write!(
                f,
                "\n{}",
                indent::indent_all_with("    ", failure.to_error().to_string())
            )?;
        } else if let Some(error) = &self.error {
            write!(f, "\n{}", indent::indent_all_with("    ", error.clone()))?;
        }
        Ok(())
    }
}

/// Aggregate of all job results for one invocation. Finalized (read-only)
/// once every job has produced a result.
#[derive(Clone, Debug, Serialize, Getters)]
#[getset(get = "pub")]
pub struct RunReport {
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
    cancelled: bool,
    results: Vec<JobResult>,
}

impl RunReport {
    pub fn new(
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
        cancelled: bool,
        results: Vec<JobResult>,
    ) -> Self {
        RunReport {
            started,
            finished,
            cancelled,
            results,
        }
    }

    /// Success only if nothing was cancelled and every job succeeded.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.iter().all(JobResult::is_success)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let duration = self.finished.signed_duration_since(self.started);
        writeln!(
            f,
            "backup run: {} job(s) in {}.{:03}s{}{}",
            self.results.len(),
            duration.num_seconds(),
            duration.num_milliseconds().rem_euclid(1000),
            if self.cancelled { " [cancelled]" } else { "" },
            if self.is_success() { "" } else { " [failed]" },
        )?;
        write!(
            f,
            "{}",
            self.results
                .iter()
                .map(|r| indent::indent_all_with("  ", r.to_string()))
                .join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(kind: StageKind, exit_code: Option<i32>, stderr: &str) -> StageResult {
        StageResult {
            kind,
            exit_code,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_aggregate_success_requires_every_job_success() {
        let now = Utc::now();
        let report = RunReport::new(
            now,
            now,
            false,
            vec![
                JobResult::new("a".into(), JobStatus::Success, vec![]),
                JobResult::new("b".into(), JobStatus::PartialFailure, vec![]),
                JobResult::new("c".into(), JobStatus::Success, vec![]),
            ],
        );
        assert!(!report.is_success());
        assert_eq!(report.results()[1].job_name().as_ref(), "b");
    }

    #[test]
    fn test_aggregate_success_all_green() {
        let now = Utc::now();
        let report = RunReport::new(
            now,
            now,
            false,
            vec![JobResult::new("a".into(), JobStatus::Success, vec![])],
        );
        assert!(report.is_success());
    }

    #[test]
    fn test_cancelled_run_is_never_success() {
        let now = Utc::now();
        let report = RunReport::new(now, now, true, vec![]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_order_matches_insertion() {
        let now = Utc::now();
        let report = RunReport::new(
            now,
            now,
            false,
            vec![
                JobResult::new("first".into(), JobStatus::Success, vec![]),
                JobResult::new("second".into(), JobStatus::Failure, vec![]),
            ],
        );
        let names: Vec<_> = report
            .results()
            .iter()
            .map(|r| r.job_name().as_ref().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_display_surfaces_first_failing_stage_and_stderr() {
        let result = JobResult::new(
            "docs".into(),
            JobStatus::PartialFailure,
            vec![
                stage(StageKind::Transfer, Some(0), ""),
                stage(StageKind::Decrypt, Some(2), "gpg: decryption failed\n"),
            ],
        );
        let rendered = result.to_string();
        assert!(rendered.contains("docs: partial failure"));
        assert!(rendered.contains("decrypt stage failed"));
        assert!(rendered.contains("exit code 2"));
        assert!(rendered.contains("gpg: decryption failed"));
    }

    #[test]
    fn test_stage_result_converts_to_stage_error() {
        let failure = stage(StageKind::Compress, Some(2), "xz: unexpected end of input\n");
        match failure.to_error() {
            Error::Stage {
                kind,
                exit_code,
                stderr,
            } => {
                assert_eq!(kind, StageKind::Compress);
                assert_eq!(exit_code, Some(2));
                assert!(stderr.contains("unexpected end of input"));
            }
            other => panic!("expected stage error, got {other:?}"),
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::PartialFailure).unwrap(),
            "\"partial_failure\""
        );
        assert_eq!(
            serde_json::to_string(&StageKind::Unbundle).unwrap(),
            "\"unbundle\""
        );
    }

    #[test]
    fn test_display_surfaces_abort_error() {
        let result = JobResult::aborted(
            "bad".into(),
            &Error::config("encrypt requires a recipient key reference"),
        );
        let rendered = result.to_string();
        assert!(rendered.contains("bad: failure"));
        assert!(rendered.contains("recipient"));
    }
}
