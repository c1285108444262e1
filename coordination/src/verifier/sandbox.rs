//! Sandbox Executor — run one candidate against one stdin/stdout case
//!
//! Every invocation owns a fresh temporary directory holding the source file.
//! The child runs with a cleared environment (only `PATH` is passed through)
//! in its own process group on Unix. The outcome is decided when the
//! interpreter exits, times out or is cancelled; at that point the whole group
//! is killed, background children included. Dropping the future kills it too.
//! The directory is removed before `run` returns on every path.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sandbox configuration, shared read-only across runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command; the source file path is appended as the last argument
    pub interpreter: Vec<String>,
    /// File name the candidate is written to inside the sandbox directory
    pub source_file: String,
    /// Wall-clock limit per test case (seconds)
    pub timeout_secs: u64,
    /// Captured stdout/stderr are truncated to this many bytes each
    pub max_output_bytes: usize,
    /// Test cases executed concurrently per validation
    pub max_parallel_cases: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            source_file: "solution.py".to_string(),
            timeout_secs: 10,
            max_output_bytes: 64 * 1024,
            max_parallel_cases: 4,
        }
    }
}

impl SandboxConfig {
    /// Shell-script sandbox, used where no Python toolchain is assumed
    pub fn shell() -> Self {
        Self {
            interpreter: vec!["sh".to_string()],
            source_file: "solution.sh".to_string(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Exit status zero
    Succeeded,
    /// Non-zero exit (or killed by a signal, `code` = None)
    NonZeroExit { code: Option<i32> },
    /// Wall-clock limit hit; process killed
    TimedOut,
    /// Sandbox directory, source file or process could not be set up
    LaunchFailed,
    /// Run cancelled; process killed
    Cancelled,
}

/// Result of one sandboxed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// True iff the process exited with status zero in time
    pub ok: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Failure description; empty when `ok`
    pub error: String,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    fn failed(status: ExecutionStatus, error: String, start: Instant) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: String::new(),
            error,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Isolated, time-boxed process runner
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute `code` with `stdin` as standard input.
    ///
    /// Never returns an error: setup problems, non-zero exits, timeouts and
    /// cancellation are all reported through [`ExecutionOutcome`].
    pub async fn run(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let start = Instant::now();

        let Some((program, args)) = self.config.interpreter.split_first() else {
            return ExecutionOutcome::failed(
                ExecutionStatus::LaunchFailed,
                "no interpreter configured".to_string(),
                start,
            );
        };

        let workdir = match tempfile::Builder::new().prefix("stepladder-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionOutcome::failed(
                    ExecutionStatus::LaunchFailed,
                    format!("failed to create sandbox directory: {e}"),
                    start,
                )
            }
        };

        let source = workdir.path().join(&self.config.source_file);
        if let Err(e) = tokio::fs::write(&source, code).await {
            return ExecutionOutcome::failed(
                ExecutionStatus::LaunchFailed,
                format!("failed to write source file: {e}"),
                start,
            );
        }

        let mut cmd = self.command(program, args, &source, workdir.path());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::failed(
                    ExecutionStatus::LaunchFailed,
                    format!("failed to launch {program}: {e}"),
                    start,
                )
            }
        };

        let mut group = ProcessGroup::of(&child);
        let limit = self.config.max_output_bytes;
        let feeder = tokio::spawn(feed(child.stdin.take(), stdin.as_bytes().to_vec()));
        let stdout_reader = tokio::spawn(read_capped(child.stdout.take(), limit));
        let stderr_reader = tokio::spawn(read_capped(child.stderr.take(), limit));

        enum Ended {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        // Judged on the interpreter's exit, not on pipe EOF: background
        // children may hold stdout open long after it.
        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = tokio::time::sleep(timeout) => Ended::TimedOut,
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        group.kill();
        feeder.abort();

        let outcome = match ended {
            Ended::Exited(Ok(status)) => {
                let out = collect(stdout_reader).await;
                let err = collect(stderr_reader).await;
                let stdout = String::from_utf8_lossy(&out).into_owned();
                let stderr = String::from_utf8_lossy(&err).into_owned();
                if status.success() {
                    ExecutionOutcome {
                        ok: true,
                        stdout,
                        stderr,
                        error: String::new(),
                        status: ExecutionStatus::Succeeded,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                } else {
                    let error = if stderr.trim().is_empty() {
                        format!("process exited with {status}")
                    } else {
                        stderr.trim().to_string()
                    };
                    ExecutionOutcome {
                        ok: false,
                        stdout,
                        stderr,
                        error,
                        status: ExecutionStatus::NonZeroExit {
                            code: status.code(),
                        },
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                }
            }
            Ended::Exited(Err(e)) => {
                kill(&mut child).await;
                stdout_reader.abort();
                stderr_reader.abort();
                ExecutionOutcome::failed(
                    ExecutionStatus::LaunchFailed,
                    format!("failed to wait for process: {e}"),
                    start,
                )
            }
            Ended::TimedOut => {
                kill(&mut child).await;
                stdout_reader.abort();
                stderr_reader.abort();
                ExecutionOutcome::failed(
                    ExecutionStatus::TimedOut,
                    format!("timed out after {:.1}s", timeout.as_secs_f64()),
                    start,
                )
            }
            Ended::Cancelled => {
                kill(&mut child).await;
                stdout_reader.abort();
                stderr_reader.abort();
                ExecutionOutcome::failed(
                    ExecutionStatus::Cancelled,
                    "cancelled".to_string(),
                    start,
                )
            }
        };

        debug!(
            status = ?outcome.status,
            duration_ms = outcome.duration_ms,
            "Sandbox execution finished"
        );

        if let Err(e) = workdir.close() {
            warn!("Failed to remove sandbox directory: {e}");
        }
        outcome
    }

    fn command(&self, program: &str, args: &[String], source: &Path, workdir: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(source)
            .current_dir(workdir)
            .env_clear()
            .env("HOME", workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        // Own process group, so the whole tree can be killed without touching ours.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// How long output pipes may stay open once the process group is gone
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// The candidate's process group (the child is its leader).
///
/// Killed once the interpreter exits, times out or is cancelled, and again
/// on drop if `run` is abandoned mid-flight.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                // Group already empty
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid, "Failed to kill sandbox process group: {e}"),
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill and reap the interpreter itself.
async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill sandboxed process: {e}");
    }
}

async fn feed(pipe: Option<tokio::process::ChildStdin>, input: Vec<u8>) {
    if let Some(mut pipe) = pipe {
        // The program may exit without reading its input; a broken pipe
        // here is not a failure of the run.
        let _ = pipe.write_all(&input).await;
        let _ = pipe.shutdown().await;
    }
}

/// Output captured by a reader task, or nothing if the pipe stays open.
async fn collect(reader: tokio::task::JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = reader.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!("Output reader failed: {e}");
            Vec::new()
        }
        Err(_) => {
            abort.abort();
            warn!("Output pipe still open after the process group was killed");
            Vec::new()
        }
    }
}

/// Drain `pipe` to EOF, keeping at most `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::shell())
    }

    const SUM_EVENS: &str = r#"read line
s=0
for n in $line; do
  if [ $((n % 2)) -eq 0 ]; then s=$((s + n)); fi
done
echo "$s"
"#;

    #[tokio::test]
    async fn test_runs_with_stdin() {
        let out = sandbox()
            .run(
                SUM_EVENS,
                "1 2 3 4 5 6\n",
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.ok, "unexpected failure: {}", out.error);
        assert_eq!(out.stdout.trim(), "12");
        assert_eq!(out.status, ExecutionStatus::Succeeded);
        assert!(out.error.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let out = sandbox()
            .run(
                "echo boom >&2\nexit 3\n",
                "",
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.ok);
        assert_eq!(out.error, "boom");
        assert_eq!(out.status, ExecutionStatus::NonZeroExit { code: Some(3) });
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr() {
        let out = sandbox()
            .run("exit 2\n", "", Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(!out.ok);
        assert!(out.error.contains("exit"), "error was: {}", out.error);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let timeout = Duration::from_secs(1);
        let start = Instant::now();
        let out = sandbox()
            .run("while :; do :; done\n", "", timeout, &CancellationToken::new())
            .await;
        assert!(!out.ok);
        assert_eq!(out.status, ExecutionStatus::TimedOut);
        assert!(out.error.contains("timed out"));
        assert!(start.elapsed() < timeout + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let out = sandbox()
            .run("sleep 30\n", "", Duration::from_secs(30), &cancel)
            .await;
        assert_eq!(out.status, ExecutionStatus::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Script that touches `marker` from a background subshell after 2s.
    fn delayed_marker(marker: &std::path::Path, rest: &str) -> String {
        format!("(sleep 2; : > '{}') &\n{rest}", marker.display())
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("leaked");
        let out = sandbox()
            .run(
                &delayed_marker(&marker, "while :; do :; done\n"),
                "",
                Duration::from_millis(500),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.status, ExecutionStatus::TimedOut);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[tokio::test]
    async fn test_cancellation_kills_background_children() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("leaked");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let out = sandbox()
            .run(
                &delayed_marker(&marker, "sleep 30\n"),
                "",
                Duration::from_secs(30),
                &cancel,
            )
            .await;
        assert_eq!(out.status, ExecutionStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background child outlived cancellation");
    }

    #[tokio::test]
    async fn test_exit_with_background_child_holding_stdout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("leaked");
        let start = Instant::now();
        let out = sandbox()
            .run(
                &delayed_marker(&marker, "sleep 30 &\necho 12\n"),
                "",
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.ok, "unexpected failure: {:?} {}", out.status, out.error);
        assert_eq!(out.status, ExecutionStatus::Succeeded);
        assert_eq!(out.stdout.trim(), "12");
        assert!(start.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background child outlived the interpreter");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_failure() {
        let sandbox = Sandbox::new(SandboxConfig {
            interpreter: vec!["definitely-not-an-interpreter-xyz".to_string()],
            ..SandboxConfig::shell()
        });
        let out = sandbox
            .run("echo hi\n", "", Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(!out.ok);
        assert_eq!(out.status, ExecutionStatus::LaunchFailed);
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_output_bytes: 16,
            ..SandboxConfig::shell()
        });
        let out = sandbox
            .run(
                "i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done\n",
                "",
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.ok);
        assert_eq!(out.stdout.len(), 16);
    }

    #[tokio::test]
    async fn test_sandbox_directory_is_removed() {
        let out = sandbox()
            .run("pwd\n", "", Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(out.ok);
        let dir = std::path::PathBuf::from(out.stdout.trim());
        assert!(!dir.exists(), "sandbox dir {} was left behind", dir.display());
    }
}
