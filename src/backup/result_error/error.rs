use crate::backup::pipeline::StageKind;
use crate::backup::result_error::WithMsg;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ThreadPoolBuild(#[from] rayon::ThreadPoolBuildError),
    /// Bad job specification, caught before any process is launched.
    #[error("invalid job configuration: {0}")]
    Configuration(String),
    /// The external tool binary could not be found or executed. Distinct
    /// from the tool running and returning a non-zero exit code.
    #[error("cannot launch {tool:?}: {source}")]
    ProcessLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    /// The external tool ran and reported failure.
    #[error("{} stage failed ({}):\n{}", kind, describe_exit(exit_code), indent::indent_all_with("  ", stderr.trim_end().to_string()))]
    Stage {
        kind: StageKind,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("cancelled before completion")]
    Cancelled,
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}
