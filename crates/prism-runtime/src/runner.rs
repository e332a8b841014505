//! Supervised subprocess execution.
//!
//! Every command runs in its own process group. On timeout or cancellation
//! the whole group is killed, not just the direct child, so helper processes
//! spawned by the tool do not outlive the execution.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::RunnerConfig;
use crate::error::RunnerError;

/// Upper bound on draining output once the group has been killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one supervised command.
#[derive(Debug)]
pub struct CommandResult {
    /// Merged stdout and stderr, one line per `\n`, in arrival order.
    pub output: String,
    /// Real exit status, or -1 on timeout, cancellation or spawn failure.
    pub exit_code: i32,
    pub duration: Duration,
    /// `None` only for a zero exit.
    pub error: Option<RunnerError>,
}

impl CommandResult {
    fn failed(error: RunnerError, started: Instant) -> Self {
        Self {
            output: String::new(),
            exit_code: -1,
            duration: started.elapsed(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, keeping the output on success.
    pub fn into_result(self) -> Result<String, RunnerError> {
        match self.error {
            None => Ok(self.output),
            Some(e) => Err(e),
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs commands with a deadline and cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Creates a runner with the given deadline. Zero selects the default.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(RunnerConfig::new().with_timeout(timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.config.effective_timeout()
    }

    /// Runs `args[0]` with `args[1..]` and buffers its output.
    pub async fn run(&self, args: &[String], cancel: &CancellationToken) -> CommandResult {
        self.run_streaming(args, cancel, |_| {}).await
    }

    /// Runs a command, handing each output line to `on_line` as it arrives.
    ///
    /// Lines are delivered without their trailing newline and in the order
    /// they were read. Invalid UTF-8 is replaced rather than rejected.
    pub async fn run_streaming<F>(
        &self,
        args: &[String],
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> CommandResult
    where
        F: FnMut(&str) + Send,
    {
        let started = Instant::now();
        let Some((program, rest)) = args.split_first() else {
            return CommandResult::failed(RunnerError::EmptyCommand, started);
        };
        let timeout = self.timeout();

        let mut command = Command::new(program);
        command
            .args(rest)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return CommandResult::failed(
                    RunnerError::Spawn {
                        program: program.clone(),
                        source,
                    },
                    started,
                )
            }
        };
        // Kept for the group kill; `child.id()` is gone once the leader is reaped.
        let pid = child.id();
        debug!(program = %program, args = ?rest, pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Spawned command");

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut output = String::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                Some(line) = rx.recv() => push_line(&mut output, &mut on_line, line),
                status = child.wait() => break Outcome::Exited(status),
                _ = &mut deadline => break Outcome::TimedOut,
                _ = cancel.cancelled() => break Outcome::Cancelled,
            }
        };

        let (exit_code, error) = match outcome {
            Outcome::Exited(status) => {
                // Pipes close once every writer in the group has exited.
                let interrupted = loop {
                    tokio::select! {
                        line = rx.recv() => match line {
                            Some(line) => push_line(&mut output, &mut on_line, line),
                            None => break None,
                        },
                        _ = &mut deadline => {
                            warn!(program = %program, "Output still open at deadline; killing process group");
                            kill_process_group(&mut child, pid).await;
                            break Some(RunnerError::Timeout(timeout));
                        }
                        _ = cancel.cancelled() => {
                            debug!(program = %program, "Cancelled while draining; killing process group");
                            kill_process_group(&mut child, pid).await;
                            break Some(RunnerError::Cancelled);
                        }
                    }
                };
                match (interrupted, status) {
                    (Some(error), _) => {
                        drain_after_kill(&mut rx, &mut output, &mut on_line).await;
                        (-1, Some(error))
                    }
                    (None, Ok(status)) => {
                        let code = status.code().unwrap_or(-1);
                        let error = (!status.success()).then_some(RunnerError::NonZeroExit(code));
                        (code, error)
                    }
                    (None, Err(e)) => (-1, Some(RunnerError::Wait(e))),
                }
            }
            Outcome::TimedOut => {
                warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "Command timed out; killing process group");
                kill_process_group(&mut child, pid).await;
                drain_after_kill(&mut rx, &mut output, &mut on_line).await;
                (-1, Some(RunnerError::Timeout(timeout)))
            }
            Outcome::Cancelled => {
                debug!(program = %program, "Command cancelled; killing process group");
                kill_process_group(&mut child, pid).await;
                drain_after_kill(&mut rx, &mut output, &mut on_line).await;
                (-1, Some(RunnerError::Cancelled))
            }
        };

        let duration = started.elapsed();
        debug!(program = %program, exit_code, elapsed_ms = duration.as_millis() as u64, "Command finished");
        CommandResult {
            output,
            exit_code,
            duration,
            error,
        }
    }
}

fn push_line<F: FnMut(&str)>(output: &mut String, on_line: &mut F, line: String) {
    trace!(line = %line, "output");
    on_line(&line);
    output.push_str(&line);
    output.push('\n');
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}

async fn drain_after_kill<F: FnMut(&str)>(
    rx: &mut mpsc::UnboundedReceiver<String>,
    output: &mut String,
    on_line: &mut F,
) {
    let grace = tokio::time::sleep(KILL_DRAIN_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => push_line(output, on_line, line),
                None => break,
            },
            _ = &mut grace => break,
        }
    }
}

/// Kills every process in the group led by `pid`, then reaps the child.
///
/// The group outlives its leader while any member is alive, so this also
/// works after the direct child has exited.
async fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            let group = format!("-{}", pid);
            let killed = Command::new("kill")
                .args(["-s", "KILL", "--", group.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match killed {
                Ok(status) if status.success() => {}
                Ok(status) => debug!(pid, ?status, "Process group kill reported failure"),
                Err(e) => warn!(pid, error = %e, "Failed to run kill for process group"),
            }
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Direct child kill failed");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed command");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn sh(script: &str) -> Vec<String> {
        args(&["sh", "-c", script])
    }

    #[tokio::test]
    async fn test_empty_command() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(5));
        let result = runner.run(&[], &CancellationToken::new()).await;

        assert!(matches!(result.error, Some(RunnerError::EmptyCommand)));
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_simple_command() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(5));
        let result = runner.run(&args(&["echo", "hello"]), &CancellationToken::new()).await;

        assert!(result.is_success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hello\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_code() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(5));
        let result = runner.run(&sh("echo oops >&2; exit 3"), &CancellationToken::new()).await;

        assert_eq!(result.exit_code, 3);
        assert!(matches!(result.error, Some(RunnerError::NonZeroExit(3))));
        assert_eq!(result.output, "oops\n");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(5));
        let result = runner
            .run(&args(&["nonexistent_command_12345"]), &CancellationToken::new())
            .await;

        assert!(matches!(result.error, Some(RunnerError::Spawn { .. })));
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_timeout_kills_quickly() {
        let runner = CommandRunner::with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let result = runner.run(&args(&["sleep", "10"]), &CancellationToken::new()).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_ref().is_some_and(RunnerError::is_timeout));
        assert!(result
            .error
            .unwrap()
            .to_string()
            .starts_with("command timed out after"));
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        // The grandchild holds stdout open; only a group kill closes it.
        let runner = CommandRunner::with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let result = runner
            .run(&sh("sleep 10 & echo started; wait"), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.error.as_ref().is_some_and(RunnerError::is_timeout));
        assert_eq!(result.output, "started\n");
    }

    #[tokio::test]
    async fn test_timeout_after_leader_exits() {
        // The shell exits 0 at once; the background sleep keeps stdout open.
        let runner = CommandRunner::with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let result = runner
            .run(&sh("sleep 10 & echo hi; exit 0"), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_ref().is_some_and(RunnerError::is_timeout));
        assert_eq!(result.output, "hi\n");
    }

    #[tokio::test]
    async fn test_cancel_after_leader_exits() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = runner.run(&sh("sleep 10 & exit 0"), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_ref().is_some_and(RunnerError::is_cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_terminates() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = runner.run(&args(&["sleep", "10"]), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_ref().is_some_and(RunnerError::is_cancelled));
    }

    #[tokio::test]
    async fn test_streaming_preserves_order() {
        let runner = CommandRunner::with_timeout(Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let result = runner
            .run_streaming(
                &sh("for i in 1 2 3 4 5; do echo line$i; done; printf tail"),
                &CancellationToken::new(),
                move |line| sink.lock().unwrap().push(line.to_string()),
            )
            .await;

        assert!(result.is_success());
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["line1", "line2", "line3", "line4", "line5", "tail"]);
        assert_eq!(result.output, "line1\nline2\nline3\nline4\nline5\ntail\n");
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let runner = CommandRunner::new(
            RunnerConfig::new()
                .with_timeout(Duration::from_secs(5))
                .with_env("PRISM_TEST_VALUE", "42"),
        );
        let result = runner.run(&sh("echo $PRISM_TEST_VALUE"), &CancellationToken::new()).await;
        assert_eq!(result.into_result().unwrap(), "42\n");
    }
}
