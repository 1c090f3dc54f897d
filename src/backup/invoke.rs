//! Launches one external process per compiled stage and collects its
//! outcome.
//!
//! stderr is always piped and drained on a worker thread so failure text
//! can be surfaced even when stdout is connected elsewhere. Waiting polls
//! the child so a cancellation signal can terminate it promptly.

use crate::backup::pipeline::{StageKind, StageSpec, StdioSpec};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::File;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run-level cancellation signal, shared by every invoker of a run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct StageOutcome {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// An owned handle to one launched stage process.
pub struct RunningStage {
    kind: StageKind,
    child: Child,
    stderr_reader: Option<JoinHandle<String>>,
}

impl RunningStage {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Hands the process's stdout to the next stage in a piped chain.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Blocks until the process terminates, or kills it if the token
    /// fires first. The outcome is returned either way so the caller can
    /// record what actually happened.
    pub fn wait(mut self, cancel: &CancelToken) -> Result<StageOutcome> {
        let status = loop {
            if cancel.is_cancelled() {
                debug!("cancellation requested, killing {} stage", self.kind);
                let _ = self.child.kill();
                break self.child.wait()?;
            }
            match self.child.try_wait()? {
                Some(status) => break status,
                None => std::thread::sleep(CANCEL_POLL_INTERVAL),
            }
        };

        let stderr = self
            .stderr_reader
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();

        Ok(StageOutcome {
            exit_code: status.code(),
            stderr,
        })
    }
}

/// Launches exactly one external process for the given stage.
///
/// `stdin` is supplied by the caller because only the executor knows
/// whether it comes from a file, the previous stage's stdout, or the
/// invoker's own stream. A missing or unexecutable binary surfaces as
/// [`Error::ProcessLaunch`], distinct from the tool failing after launch.
pub fn spawn_stage(spec: &StageSpec, stdin: Stdio) -> Result<RunningStage> {
    let stdout = match &spec.stdout_sink {
        StdioSpec::PreviousStage => Stdio::piped(),
        StdioSpec::File(path) => File::create(path)?.into(),
        StdioSpec::Inherit => Stdio::inherit(),
    };

    debug!("launching {} stage: {:?}", spec.kind, spec.argv);
    let mut child = Command::new(spec.tool())
        .args(&spec.argv[1..])
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::ProcessLaunch {
            tool: spec.tool().to_string(),
            source,
        })?;

    let stderr_reader = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });

    Ok(RunningStage {
        kind: spec.kind,
        child,
        stderr_reader,
    })
}

/// Opens the stdin handle for the first stage of a piped group.
pub fn open_stdin(spec: &StageSpec) -> Result<Stdio> {
    match &spec.stdin_source {
        StdioSpec::File(path) => Ok(File::open(path)?.into()),
        StdioSpec::Inherit => Ok(Stdio::inherit()),
        // A group never starts on a PreviousStage source; give the
        // process an empty stream rather than stealing the caller's.
        StdioSpec::PreviousStage => Ok(Stdio::null()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh_stage(kind: StageKind, script: &str) -> StageSpec {
        StageSpec {
            kind,
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            stdin_source: StdioSpec::Inherit,
            stdout_sink: StdioSpec::Inherit,
        }
    }

    #[test]
    fn test_successful_stage_reports_exit_zero() {
        let stage = sh_stage(StageKind::Transfer, "exit 0");
        let running = spawn_stage(&stage, Stdio::null()).unwrap();
        let outcome = running.wait(&CancelToken::new()).unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stderr.is_empty());
    }

    #[test]
    fn test_failing_stage_reports_exit_code_and_stderr() {
        let stage = sh_stage(StageKind::Compress, "echo boom >&2; exit 3");
        let running = spawn_stage(&stage, Stdio::null()).unwrap();
        let outcome = running.wait(&CancelToken::new()).unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("boom"));
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let stage = StageSpec {
            kind: StageKind::Transfer,
            argv: vec!["definitely-not-a-real-tool".to_string()],
            stdin_source: StdioSpec::Inherit,
            stdout_sink: StdioSpec::Inherit,
        };
        match spawn_stage(&stage, Stdio::null()) {
            Err(Error::ProcessLaunch { tool, .. }) => {
                assert_eq!(tool, "definitely-not-a-real-tool")
            }
            other => panic!("expected launch error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_cancel_kills_running_stage() {
        let stage = sh_stage(StageKind::Compress, "sleep 30");
        let running = spawn_stage(&stage, Stdio::null()).unwrap();
        let cancel = CancelToken::new();

        let killer = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let outcome = running.wait(&cancel).unwrap();
        killer.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        // SIGKILL leaves no exit code
        assert_ne!(outcome.exit_code, Some(0));
    }

    #[test]
    fn test_stderr_captured_while_stdout_piped() {
        let mut stage = sh_stage(StageKind::Bundle, "echo out; echo err >&2");
        stage.stdout_sink = StdioSpec::PreviousStage;
        let mut running = spawn_stage(&stage, Stdio::null()).unwrap();
        let mut stdout = running.take_stdout().unwrap();
        let outcome = running.wait(&CancelToken::new()).unwrap();

        let mut piped = String::new();
        stdout.read_to_string(&mut piped).unwrap();
        assert_eq!(piped.trim(), "out");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stderr.contains("err"));
    }
}
