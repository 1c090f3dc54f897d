//! # pipeback
//!
//! A declarative backup runner that turns named backup jobs into
//! pipelines of external transfer/archival/encryption tools.
//!
//! ## Features
//!
//! - **Opaque Endpoints**: local paths, remote-shell and daemon syntaxes
//!   pass straight through to the transfer tool
//! - **Push and Pull Topologies**: process-then-transfer, or
//!   transfer-then-unprocess, with mirrored stage ordering
//! - **Composable Stages**: bundling (tar), compression (xz) and
//!   encryption (gpg) toggle independently per job
//! - **Streaming Pipelines**: adjacent stream filters are connected
//!   stdout to stdin; staged artifacts are cleaned up on every exit path
//! - **Isolated Jobs**: one job's failure never aborts its siblings, and
//!   a moved-but-unfinished job is reported distinctly
//!
//! ## Quick Start
//!
//! ```no_run
//! use pipeback::backup::backup_config::BackupConfig;
//! use pipeback::backup::invoke::CancelToken;
//! use pipeback::backup::run::run;
//! use validator::Validate;
//!
//! // Load configuration from YAML file
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! config.validate()?;
//!
//! // Execute every job and inspect the aggregate report
//! let pool = rayon::ThreadPoolBuilder::new().num_threads(config.concurrency).build()?;
//! let report = run(&config, &[], std::sync::Arc::new(pool), CancelToken::new())?;
//! println!("{report}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
