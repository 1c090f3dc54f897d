use clap::Parser;
use pipeback::backup::backup_config::BackupConfig;
use pipeback::backup::invoke::CancelToken;
use pipeback::backup::report::RunReport;
use pipeback::backup::result_error::error::Error;
use pipeback::backup::result_error::result::Result;
use pipeback::backup::result_error::WithMsg;
use pipeback::backup::run::run;
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::error;
use validator::Validate;

/// A micro backup manager: compiles named backup jobs into pipelines of
/// external transfer/archival/encryption tools and runs them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    /// Only run the named job (may be repeated; default is all jobs)
    #[arg(short, long = "job")]
    jobs: Vec<String>,

    /// Maximum number of jobs running at once (overrides the config file)
    #[arg(long = "jobs", value_name = "N")]
    concurrency: Option<usize>,

    /// GPG home directory to use when encrypting or decrypting
    #[arg(long)]
    gpg_home: Option<PathBuf>,

    /// Print additional output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match load_and_run(&args) {
        Ok(report) => {
            println!("{report}");
            exit(if report.is_success() { 0 } else { 1 });
        }
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}

fn load_and_run(args: &Args) -> Result<RunReport> {
    let mut config = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
        .with_msg(format!("Parse YAML config failed: {:?}", &args.config))?;

    config
        .validate()
        .map_err(Error::from)
        .with_msg(format!("Config validation failed: {:?}", &args.config))?;

    apply_overrides(&mut config, args)?;

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.concurrency)
        .build()?;

    run(&config, &args.jobs, Arc::new(pool), CancelToken::new())
}

fn apply_overrides(config: &mut BackupConfig, args: &Args) -> Result<()> {
    if let Some(gpg_home) = &args.gpg_home {
        config.tools.gpg_home = Some(Arc::from(gpg_home.as_path()));
    }
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(Error::config("--jobs must be at least 1"));
        }
        config.concurrency = concurrency;
    }
    Ok(())
}
