//! Runs one compiled pipeline to completion.
//!
//! Stages execute strictly in order. Consecutive piped stages are
//! launched together so producer and consumer overlap; file-staged
//! neighbours run fully sequentially. The first non-zero exit stops all
//! further launching, and staged artifacts are removed on every exit
//! path through a drop guard.

use crate::backup::invoke::{self, CancelToken, RunningStage};
use crate::backup::pipeline::{Pipeline, StageKind, StageSpec, StdioSpec};
use crate::backup::report::{JobResult, JobStatus, StageResult};
use crate::backup::result_error::error::Error;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns the staged artifact paths of one job and removes them when the
/// pipeline exits, however it exits. Removal failures are logged and
/// never change the job's status.
struct TempArtifacts {
    job_name: Arc<str>,
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    fn new(job_name: Arc<str>, paths: Vec<PathBuf>) -> Self {
        TempArtifacts { job_name, paths }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("job {:?}: removed staged artifact {:?}", self.job_name, path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "job {:?}: failed to remove staged artifact {:?}: {}",
                    self.job_name, path, e
                ),
            }
        }
    }
}

/// Splits the linear chain into maximal runs of piped stages. Each run is
/// launched as a unit; runs execute sequentially.
fn piped_groups(stages: &[StageSpec]) -> Vec<&[StageSpec]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..stages.len() {
        if stages[i].stdin_source != StdioSpec::PreviousStage {
            groups.push(&stages[start..i]);
            start = i;
        }
    }
    if !stages.is_empty() {
        groups.push(&stages[start..]);
    }
    groups
}

pub fn execute(pipeline: &Pipeline, cancel: &CancelToken) -> JobResult {
    let _cleanup = TempArtifacts::new(pipeline.job_name.clone(), pipeline.temp_files.clone());

    for dir in &pipeline.ensure_dirs {
        if let Err(e) = std::fs::create_dir_all(dir) {
            return JobResult::aborted(
                pipeline.job_name.clone(),
                &Error::config(format!("cannot create directory {:?}: {}", dir, e)),
            );
        }
    }

    let mut stage_results: Vec<StageResult> = Vec::new();
    'groups: for group in piped_groups(&pipeline.stages) {
        if cancel.is_cancelled() {
            break;
        }

        let mut running: Vec<RunningStage> = Vec::with_capacity(group.len());
        let mut launch_failure: Option<StageResult> = None;
        for (i, spec) in group.iter().enumerate() {
            let stdin = if i == 0 {
                match invoke::open_stdin(spec) {
                    Ok(stdin) => stdin,
                    Err(e) => {
                        launch_failure = Some(StageResult {
                            kind: spec.kind,
                            exit_code: None,
                            stderr: e.to_string(),
                        });
                        break;
                    }
                }
            } else {
                match running.last_mut().and_then(RunningStage::take_stdout) {
                    Some(stdout) => Stdio::from(stdout),
                    None => Stdio::null(),
                }
            };

            match invoke::spawn_stage(spec, stdin) {
                Ok(stage) => running.push(stage),
                Err(e) => {
                    launch_failure = Some(StageResult {
                        kind: spec.kind,
                        exit_code: None,
                        stderr: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(failure) = launch_failure {
            // The stage that failed to launch is the failure to surface;
            // producers killed as a consequence are recorded after it.
            stage_results.push(failure);
            for mut stage in running {
                let kind = stage.kind();
                stage.kill();
                stage_results.push(StageResult {
                    kind,
                    exit_code: None,
                    stderr: "aborted: a downstream stage failed to launch".to_string(),
                });
            }
            break;
        }

        // Wait in chain order; on cancellation each wait kills its
        // process, so the whole group is reaped either way.
        let mut group_failed = false;
        for stage in running {
            let kind = stage.kind();
            let result = match stage.wait(cancel) {
                Ok(outcome) => StageResult {
                    kind,
                    exit_code: outcome.exit_code,
                    stderr: outcome.stderr,
                },
                Err(e) => StageResult {
                    kind,
                    exit_code: None,
                    stderr: e.to_string(),
                },
            };
            group_failed |= !result.is_success();
            stage_results.push(result);
        }
        if group_failed {
            break 'groups;
        }
    }

    let completed = stage_results.len() == pipeline.stages.len()
        && stage_results.iter().all(StageResult::is_success);
    if completed && !cancel.is_cancelled() {
        if let Some((from, to)) = &pipeline.publish {
            if let Err(e) = publish_artifact(from, to) {
                // The transfer already succeeded, so data moved.
                return JobResult::new(
                    pipeline.job_name.clone(),
                    JobStatus::PartialFailure,
                    stage_results,
                )
                .with_error(format!("cannot move restored artifact into {:?}: {}", to, e));
            }
            debug!(
                "job {:?}: published restored artifact to {:?}",
                pipeline.job_name, to
            );
        }
    }

    finish(pipeline, stage_results, cancel.is_cancelled())
}

/// Moves a finished restore into its final location. Rename fails when
/// the staging dir and dest sit on different filesystems, so fall back
/// to a copy; the source is in `temp_files` and gets removed either way.
fn publish_artifact(from: &std::path::Path, to: &std::path::Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => std::fs::copy(from, to).map(|_| ()),
    }
}

fn finish(pipeline: &Pipeline, stage_results: Vec<StageResult>, cancelled: bool) -> JobResult {
    let status = match stage_results.iter().position(|r| !r.is_success()) {
        Some(fail_idx) => {
            let transfer_completed = stage_results[..fail_idx]
                .iter()
                .any(|r| r.kind == StageKind::Transfer && r.is_success());
            if transfer_completed {
                // Data moved, but a later stage left it not fully as
                // specified.
                JobStatus::PartialFailure
            } else {
                JobStatus::Failure
            }
        }
        None if stage_results.len() < pipeline.stages.len() => JobStatus::Failure,
        None => JobStatus::Success,
    };

    let result = JobResult::new(pipeline.job_name.clone(), status, stage_results);
    if cancelled && status != JobStatus::Success {
        result.with_error(Error::Cancelled.to_string())
    } else {
        result
    }
}
