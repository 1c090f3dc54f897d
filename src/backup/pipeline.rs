//! Compiles one job specification into an ordered chain of external tool
//! invocations.
//!
//! Compilation is a pure function of the job: it launches nothing and
//! touches no filesystem state. Staging paths for stream-terminating
//! stages are allocated here (scoped to the unique job name) and recorded
//! on the [`Pipeline`] so the executor can remove them on every exit path.

use crate::backup::backup_config::ToolsConfig;
use crate::backup::job::{Direction, JobSpec};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use derive_more::Display;
use itertools::Itertools;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    #[display("transfer")]
    Transfer,
    #[display("bundle")]
    Bundle,
    #[display("compress")]
    Compress,
    #[display("encrypt")]
    Encrypt,
    #[display("decrypt")]
    Decrypt,
    #[display("decompress")]
    Decompress,
    #[display("unbundle")]
    Unbundle,
}

impl StageKind {
    /// File extension contributed to a staged artifact name, for the
    /// stage kinds that produce one.
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            StageKind::Bundle => Some("tar"),
            StageKind::Compress => Some("xz"),
            StageKind::Encrypt => Some("gpg"),
            _ => None,
        }
    }
}

/// Where a stage's stdin comes from or its stdout goes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StdioSpec {
    /// Connected to the adjacent stage in the chain.
    PreviousStage,
    /// Redirected to/from a named file.
    File(PathBuf),
    /// Passed through from the invoker's own stream.
    Inherit,
}

/// One compiled pipeline step: a single external tool invocation with its
/// stdio wiring decided.
#[derive(Clone, Debug)]
pub struct StageSpec {
    pub kind: StageKind,
    pub argv: Vec<String>,
    pub stdin_source: StdioSpec,
    pub stdout_sink: StdioSpec,
}

impl StageSpec {
    pub fn tool(&self) -> &str {
        &self.argv[0]
    }
}

/// The compiled form of one job: a single linear chain of stages plus the
/// staging bookkeeping the executor needs.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub job_name: Arc<str>,
    pub stages: Vec<StageSpec>,
    /// Staging paths allocated between non-piped stages. The executor
    /// removes these on success, failure and cancellation alike.
    pub temp_files: Vec<PathBuf>,
    /// Directories that must exist before the chain launches.
    pub ensure_dirs: Vec<PathBuf>,
    /// A staged artifact to move into its final location once every
    /// stage has succeeded, so a failed stage cannot clobber an
    /// existing destination file.
    pub publish: Option<(PathBuf, PathBuf)>,
}

pub fn compile(job: &JobSpec, tools: &ToolsConfig, staging_dir: &Path) -> Result<Pipeline> {
    if job.src().is_empty() {
        return Err(Error::config(format!("job {:?}: src is empty", job.name())));
    }
    if job.dest().is_empty() {
        return Err(Error::config(format!("job {:?}: dest is empty", job.name())));
    }
    if *job.encrypt() && job.recipient().is_none() {
        return Err(Error::config(format!(
            "job {:?}: encrypt requires a recipient key reference",
            job.name()
        )));
    }

    match job.direction() {
        Direction::Push => compile_push(job, tools, staging_dir),
        Direction::Pull => compile_pull(job, tools, staging_dir),
    }
}

/// Push order is [BUNDLE?, COMPRESS?, ENCRYPT?, TRANSFER]: processing
/// happens where the raw data lives, then the cooked artifact moves.
fn compile_push(job: &JobSpec, tools: &ToolsConfig, staging_dir: &Path) -> Result<Pipeline> {
    let mut filters = Vec::new();
    if *job.bundle() {
        filters.push(StageKind::Bundle);
    }
    if *job.compress() {
        filters.push(StageKind::Compress);
    }
    if *job.encrypt() {
        filters.push(StageKind::Encrypt);
    }

    if filters.is_empty() {
        let transfer = transfer_stage(job, tools, job.src().as_str(), job.dest().as_str(), true);
        return Ok(Pipeline {
            job_name: job.name().clone(),
            stages: vec![transfer],
            temp_files: Vec::new(),
            ensure_dirs: Vec::new(),
            publish: None,
        });
    }

    let staged = staged_path(job, staging_dir, &filters);
    let last = filters.len() - 1;
    let mut stages = Vec::with_capacity(filters.len() + 1);
    for (i, kind) in filters.iter().enumerate() {
        let stdin_source = if i > 0 {
            StdioSpec::PreviousStage
        } else {
            match kind {
                // tar reads the tree from its named path arguments.
                StageKind::Bundle => StdioSpec::Inherit,
                // Degraded stream processing of the raw source artifact.
                _ => StdioSpec::File(PathBuf::from(job.src().as_str())),
            }
        };
        let stdout_sink = if i == last {
            StdioSpec::File(staged.clone())
        } else {
            StdioSpec::PreviousStage
        };
        stages.push(filter_stage(job, tools, *kind, stdin_source, stdout_sink)?);
    }
    stages.push(transfer_stage(
        job,
        tools,
        &staged.display().to_string(),
        job.dest().as_str(),
        false,
    ));

    Ok(Pipeline {
        job_name: job.name().clone(),
        stages,
        temp_files: vec![staged],
        ensure_dirs: Vec::new(),
        publish: None,
    })
}

/// Pull is the mirror of push: the cooked artifact moves first, then gets
/// unprocessed on the side where it landed.
fn compile_pull(job: &JobSpec, tools: &ToolsConfig, staging_dir: &Path) -> Result<Pipeline> {
    let mut filters = Vec::new();
    if *job.encrypt() {
        filters.push(StageKind::Decrypt);
    }
    if *job.compress() {
        filters.push(StageKind::Decompress);
    }
    if *job.bundle() {
        filters.push(StageKind::Unbundle);
    }

    if filters.is_empty() {
        let transfer = transfer_stage(job, tools, job.src().as_str(), job.dest().as_str(), true);
        return Ok(Pipeline {
            job_name: job.name().clone(),
            stages: vec![transfer],
            temp_files: Vec::new(),
            ensure_dirs: Vec::new(),
            publish: None,
        });
    }

    // The staged artifact carries the extensions the push side would have
    // produced, outermost last.
    let push_order = [
        (*job.bundle(), StageKind::Bundle),
        (*job.compress(), StageKind::Compress),
        (*job.encrypt(), StageKind::Encrypt),
    ];
    let produced = push_order
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, kind)| *kind)
        .collect_vec();
    let staged = staged_path(job, staging_dir, &produced);

    let mut stages = Vec::with_capacity(filters.len() + 1);
    let mut temp_files = vec![staged.clone()];
    let mut ensure_dirs = Vec::new();
    let mut publish = None;
    stages.push(transfer_stage(
        job,
        tools,
        job.src().as_str(),
        &staged.display().to_string(),
        false,
    ));

    let last = filters.len() - 1;
    for (i, kind) in filters.iter().enumerate() {
        let stdin_source = if i == 0 {
            StdioSpec::File(staged.clone())
        } else {
            StdioSpec::PreviousStage
        };
        let stdout_sink = if i < last {
            StdioSpec::PreviousStage
        } else {
            match kind {
                // tar extracts into its named target directory.
                StageKind::Unbundle => StdioSpec::Inherit,
                // Degraded stream restore: write into the staging dir
                // and move into dest only once the filter succeeds, so
                // a failure cannot truncate an existing dest file.
                _ => {
                    let restored = staging_dir.join(format!("{}.restored", job.name()));
                    temp_files.push(restored.clone());
                    publish = Some((restored.clone(), PathBuf::from(job.dest().as_str())));
                    StdioSpec::File(restored)
                }
            }
        };
        if i == last {
            let dest = Path::new(job.dest().as_str());
            match kind {
                StageKind::Unbundle => ensure_dirs.push(dest.to_path_buf()),
                _ => {
                    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                        ensure_dirs.push(parent.to_path_buf());
                    }
                }
            }
        }
        stages.push(filter_stage(job, tools, *kind, stdin_source, stdout_sink)?);
    }

    Ok(Pipeline {
        job_name: job.name().clone(),
        stages,
        temp_files,
        ensure_dirs,
        publish,
    })
}

fn staged_path(job: &JobSpec, staging_dir: &Path, produced: &[StageKind]) -> PathBuf {
    let ext = produced.iter().filter_map(StageKind::file_ext).join(".");
    staging_dir.join(format!("{}.{}", job.name(), ext))
}

fn transfer_stage(
    job: &JobSpec,
    tools: &ToolsConfig,
    src: &str,
    dest: &str,
    raw_tree: bool,
) -> StageSpec {
    let mut argv = vec![
        tools.transfer.to_string(),
        "--quiet".to_string(),
        "--archive".to_string(),
        "--delete".to_string(),
        "--compress".to_string(),
        "--protect-args".to_string(),
    ];
    // Excludes only make sense while the raw tree is what moves; a staged
    // artifact was already filtered by the bundle stage.
    if raw_tree {
        for pattern in job.exclude() {
            argv.push(format!("--filter=exclude_{pattern}"));
        }
    }
    argv.push(src.to_string());
    argv.push(dest.to_string());

    StageSpec {
        kind: StageKind::Transfer,
        argv,
        stdin_source: StdioSpec::Inherit,
        stdout_sink: StdioSpec::Inherit,
    }
}

fn filter_stage(
    job: &JobSpec,
    tools: &ToolsConfig,
    kind: StageKind,
    stdin_source: StdioSpec,
    stdout_sink: StdioSpec,
) -> Result<StageSpec> {
    let argv = match kind {
        StageKind::Bundle => {
            let src = Path::new(job.src().as_str());
            let base = src
                .file_name()
                .ok_or_else(|| {
                    Error::config(format!(
                        "job {:?}: src {:?} has no final path component to bundle",
                        job.name(),
                        job.src()
                    ))
                })?
                .to_string_lossy()
                .into_owned();
            let dir = src
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut argv = vec![
                tools.archiver.to_string(),
                "--create".to_string(),
                "--file".to_string(),
                "-".to_string(),
            ];
            for pattern in job.exclude() {
                argv.push(format!("--exclude={pattern}"));
            }
            argv.push("--directory".to_string());
            argv.push(dir.display().to_string());
            argv.push(base);
            argv
        }
        StageKind::Unbundle => vec![
            tools.archiver.to_string(),
            "--extract".to_string(),
            "--file".to_string(),
            "-".to_string(),
            "--directory".to_string(),
            job.dest().to_string(),
        ],
        StageKind::Compress => vec![
            tools.compressor.to_string(),
            "--quiet".to_string(),
            "--stdout".to_string(),
            "--compress".to_string(),
        ],
        StageKind::Decompress => vec![
            tools.compressor.to_string(),
            "--quiet".to_string(),
            "--stdout".to_string(),
            "--decompress".to_string(),
        ],
        StageKind::Encrypt => {
            let recipient = job.recipient().as_ref().ok_or_else(|| {
                Error::config(format!("job {:?}: encrypt without recipient", job.name()))
            })?;
            let mut argv = gpg_preamble(tools);
            argv.push("--recipient".to_string());
            argv.push(recipient.to_string());
            argv.push("--output".to_string());
            argv.push("-".to_string());
            argv.push("--encrypt".to_string());
            argv
        }
        StageKind::Decrypt => {
            let mut argv = gpg_preamble(tools);
            argv.push("--output".to_string());
            argv.push("-".to_string());
            argv.push("--decrypt".to_string());
            argv
        }
        StageKind::Transfer => unreachable!("transfer stages are built by transfer_stage"),
    };

    Ok(StageSpec {
        kind,
        argv,
        stdin_source,
        stdout_sink,
    })
}

fn gpg_preamble(tools: &ToolsConfig) -> Vec<String> {
    let mut argv = vec![
        tools.encryptor.to_string(),
        "--quiet".to_string(),
        "--batch".to_string(),
        "--yes".to_string(),
    ];
    if let Some(home) = &tools.gpg_home {
        argv.push("--homedir".to_string());
        argv.push(home.display().to_string());
    }
    argv
}
