//! Iterates a set of jobs, executing each compiled pipeline and
//! aggregating per-job results into one report.
//!
//! Jobs are independent: a compile or launch failure in one becomes that
//! job's `Failure` result and never aborts its siblings. Jobs may run
//! concurrently up to the pool's thread count; report order always
//! matches input order.

use crate::backup::backup_config::BackupConfig;
use crate::backup::executor;
use crate::backup::invoke::CancelToken;
use crate::backup::job::JobSpec;
use crate::backup::pipeline;
use crate::backup::report::{JobResult, RunReport};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use chrono::Utc;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(
    config: &BackupConfig,
    filter: &[String],
    pool: Arc<ThreadPool>,
    cancel: CancelToken,
) -> Result<RunReport> {
    let jobs = config.select_jobs(filter)?;

    let staging = match &config.staging_dir {
        Some(dir) => tempfile::tempdir_in(dir),
        None => tempfile::tempdir(),
    }
    .map_err(crate::backup::result_error::error::Error::from)
    .with_msg("cannot create run staging directory")?;

    let started = Utc::now();
    info!("starting backup run: {} job(s)", jobs.len());

    let results: Vec<Option<JobResult>> = pool.install(|| {
        jobs.par_iter()
            .map(|&job| {
                if cancel.is_cancelled() {
                    info!("job {:?}: skipped, run cancelled", job.name());
                    return None;
                }
                Some(run_job(job, config, staging.path(), &cancel))
            })
            .collect()
    });
    let results = results.into_iter().flatten().collect();

    let report = RunReport::new(started, Utc::now(), cancel.is_cancelled(), results);
    if report.is_success() {
        info!("backup run finished: all jobs succeeded");
    } else {
        warn!("backup run finished with failures");
    }

    Ok(report)
}

fn run_job(
    job: &JobSpec,
    config: &BackupConfig,
    staging: &std::path::Path,
    cancel: &CancelToken,
) -> JobResult {
    info!("job {:?}: starting", job.name());
    let result = match pipeline::compile(job, &config.tools, staging) {
        Ok(compiled) => executor::execute(&compiled, cancel),
        Err(e) => {
            warn!("job {:?}: did not start: {}", job.name(), e);
            return JobResult::aborted(job.name().clone(), &e);
        }
    };
    if result.is_success() {
        info!("job {:?}: success", job.name());
    } else {
        warn!("job {:?}: {}", job.name(), result.status());
    }
    result
}
