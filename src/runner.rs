//! Process Runner collaborator boundary.
//!
//! The supervisor never touches OS spawning primitives directly; it depends
//! only on the narrow [`ProcessRunner`] / [`ProcessRef`] contract defined
//! here. [`TokioProcessRunner`] is the production implementation; tests
//! substitute a scripted runner to drive the state machine deterministically.
//!
//! Output handling: stdout and stderr are piped, read line by line by one
//! forwarder task per stream, and merged into a single unbounded channel.
//! Per-stream emission order is preserved; the channel closes when both
//! streams reach EOF, which is how the supervisor learns the process is gone.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// A handle to one spawned process.
///
/// Owned by the supervisor for the lifetime of a run; dropped when the
/// service returns to the Stopped state.
pub trait ProcessRef: Send {
    /// OS process id, when still known.
    fn id(&self) -> Option<u32>;

    /// Signal the process to terminate. Does not wait for exit.
    fn terminate(&mut self) -> Result<()>;

    /// Non-blocking exit check. `None` while the process is still running.
    ///
    /// Signal-terminated processes report exit code `-1`.
    fn poll_exit_status(&mut self) -> Result<Option<i32>>;

    /// Take the merged stdout/stderr line stream. Yields `Some` once.
    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;
}

/// Spawns processes for the supervisor.
pub trait ProcessRunner: Send + Sync + 'static {
    /// Spawn `program` with `args`, piping its output streams.
    ///
    /// Resolving successfully confirms the process has been spawned; the
    /// supervisor transitions the service to Running on that confirmation.
    fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> impl std::future::Future<Output = Result<Box<dyn ProcessRef>>> + Send;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    async fn spawn(&self, program: &Path, args: &[String]) -> Result<Box<dyn ProcessRef>> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::Process(format!("failed to spawn {}: {}", program.display(), e))
        })?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx);
        }

        debug!(program = %program.display(), pid = ?child.id(), "process spawned");

        Ok(Box::new(TokioProcessRef {
            child,
            output: Some(line_rx),
        }))
    }
}

/// Forward one output stream into the merged line channel until EOF.
fn forward_lines(
    stream: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            // Receiver dropped means the service was reset; stop reading.
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

struct TokioProcessRef {
    child: Child,
    output: Option<mpsc::UnboundedReceiver<String>>,
}

impl ProcessRef for TokioProcessRef {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|e| Error::Process(format!("failed to signal termination: {}", e)))
    }

    fn poll_exit_status(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| Error::Process(format!("failed to poll exit status: {}", e)))?;
        Ok(status.map(|s| s.code().unwrap_or(-1)))
    }

    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_captures_output_and_exit_code() {
        let runner = TokioProcessRunner;
        let mut proc = runner
            .spawn(Path::new("echo"), &["ready".to_string()])
            .await
            .expect("echo should spawn");

        let mut output = proc.take_output().expect("output stream");
        let line = tokio::time::timeout(Duration::from_secs(5), output.recv())
            .await
            .expect("line before timeout")
            .expect("one line of output");
        assert_eq!(line, "ready");

        // Stream closed means the process is done; the exit status follows
        // shortly after.
        assert!(output.recv().await.is_none());
        let mut code = None;
        for _ in 0..100 {
            code = proc.poll_exit_status().unwrap();
            if code.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_process_error() {
        let runner = TokioProcessRunner;
        let result = runner
            .spawn(Path::new("/nonexistent/anonode-test-binary"), &[])
            .await;
        assert!(matches!(result, Err(Error::Process(_))));
    }

    #[tokio::test]
    async fn take_output_yields_only_once() {
        let runner = TokioProcessRunner;
        let mut proc = runner.spawn(Path::new("true"), &[]).await.unwrap();
        assert!(proc.take_output().is_some());
        assert!(proc.take_output().is_none());
    }
}
