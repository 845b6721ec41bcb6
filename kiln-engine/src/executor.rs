//! Seam between the step cooker and subprocess execution.
//!
//! `execute()` never spawns a child process directly; it hands one
//! [`Invocation`] to whatever [`Executor`] the `BuildContext` carries. The
//! real build uses [`ProcessExecutor`], which shells out to the wrapper
//! script exactly as before; the scenario test suite swaps in a
//! [`RecordingExecutor`] instead, so assertions about which steps ran are
//! made against a recorded invocation list rather than a real `/bin/bash`.

use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;

/// One invocation of a step's wrapper script: the script path, the flags
/// `compute_step_env`/`write_scripts` assembled for it, and the directory
/// it runs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub wrapper_path: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// The result of running one wrapper script, expressed in `Executor`'s own
/// vocabulary rather than `std::process::ExitStatus` so a recording
/// executor can fabricate one without any real child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Success,
    Failed(i32),
    Aborted,
}

pub trait Executor: Send + Sync {
    fn run<'a>(&'a self, invocation: Invocation) -> BoxFuture<'a, std::io::Result<ExecOutcome>>;
}

/// Spawns the wrapper script as a real child process and waits for it,
/// killing it and reporting [`ExecOutcome::Aborted`] if Ctrl-C arrives
/// first.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run<'a>(&'a self, invocation: Invocation) -> BoxFuture<'a, std::io::Result<ExecOutcome>> {
        Box::pin(async move {
            let mut child = tokio::process::Command::new(&invocation.wrapper_path)
                .args(&invocation.args)
                .current_dir(&invocation.cwd)
                .spawn()?;

            let outcome = tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    if status.success() {
                        ExecOutcome::Success
                    } else {
                        ExecOutcome::Failed(status.code().unwrap_or(-1))
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    let _ = child.kill().await;
                    ExecOutcome::Aborted
                }
            };
            Ok(outcome)
        })
    }
}

/// Records every invocation it is asked to run and reports
/// [`ExecOutcome::Success`] without touching the filesystem or spawning
/// anything. Used by scenario tests to assert on *what* would have run,
/// keeping the suite hermetic.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    invocations: Mutex<Vec<Invocation>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapper-script invocations recorded so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().expect("recording executor mutex poisoned").clone()
    }

    /// Convenience: how many times a wrapper script under `cwd` was run.
    pub fn count_for(&self, cwd: &std::path::Path) -> usize {
        self.invocations().iter().filter(|i| i.cwd == cwd).count()
    }
}

impl Executor for RecordingExecutor {
    fn run<'a>(&'a self, invocation: Invocation) -> BoxFuture<'a, std::io::Result<ExecOutcome>> {
        self.invocations.lock().expect("recording executor mutex poisoned").push(invocation);
        Box::pin(async { Ok(ExecOutcome::Success) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_executor_never_touches_the_filesystem() {
        let executor = RecordingExecutor::new();
        let invocation = Invocation {
            wrapper_path: PathBuf::from("/does/not/exist.sh"),
            args: vec!["run".to_owned()],
            cwd: PathBuf::from("/does/not/exist"),
        };
        let outcome = executor.run(invocation.clone()).await.unwrap();
        assert_eq!(outcome, ExecOutcome::Success);
        assert_eq!(executor.invocations(), vec![invocation]);
    }
}
