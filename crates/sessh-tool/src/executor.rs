//! sessh process invocation and result validation

use crate::error::{Result, ToolError};
use crate::types::{InvocationRequest, InvocationResult, Termination};
use async_trait::async_trait;
use sessh_config::Config;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 8192;

/// Trait for running one sessh invocation
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `request` to completion, or until `cancel` fires.
    ///
    /// Never fails: spawn errors, signals and cancellation are all
    /// reported through the returned result's termination tag.
    async fn invoke(&self, request: &InvocationRequest, cancel: &CancellationToken) -> InvocationResult;
}

/// Append-only capture of one output stream
#[derive(Debug, Default, Clone)]
pub struct OutputBuffer {
    chunks: Vec<Vec<u8>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.chunks.push(chunk.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Join all chunks once and decode as UTF-8.
    ///
    /// Decoding happens after joining so multi-byte characters split
    /// across reads survive intact.
    pub fn finish(self) -> String {
        let bytes = self.chunks.concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Runs the real sessh executable
#[derive(Debug, Clone)]
pub struct SesshInvoker {
    program: String,
    env: (&'static str, &'static str),
    timeout: Option<Duration>,
}

impl Default for SesshInvoker {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SesshInvoker {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.sessh_bin.clone(),
            env: config.json_env(),
            timeout: config.call_timeout,
        }
    }

    /// Create an invoker for an arbitrary program
    pub fn new(program: impl Into<String>) -> Self {
        Self::default().with_program(program)
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn build_command(&self, request: &InvocationRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(request.args())
            .env(self.env.0, self.env.1)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for SesshInvoker {
    async fn invoke(&self, request: &InvocationRequest, cancel: &CancellationToken) -> InvocationResult {
        let mut child = match self.build_command(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to spawn sessh");
                return InvocationResult::spawn_failed(&self.program, &e);
            }
        };

        debug!(
            program = %self.program,
            pid = ?child.id(),
            args = ?request.args(),
            "Spawned sessh"
        );

        let finished = tokio::select! {
            result = collect(&mut child, request.input()) => Some(result),
            _ = cancel.cancelled() => None,
            _ = deadline(self.timeout) => None,
        };

        if let Some(result) = finished {
            return result;
        }

        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill sessh child");
        }

        if cancel.is_cancelled() {
            debug!(args = ?request.args(), "sessh invocation cancelled");
            InvocationResult::cancelled()
        } else {
            let after_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
            warn!(args = ?request.args(), after_ms, "sessh invocation timed out");
            InvocationResult::timed_out(after_ms)
        }
    }
}

/// Feed stdin, drain both output streams and wait for exit.
async fn collect(child: &mut Child, input: Option<&str>) -> InvocationResult {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let ((), out, err) = tokio::join!(feed(stdin, input), drain(stdout), drain(stderr));

    match child.wait().await {
        Ok(status) => from_status(status, out.finish(), err.finish()),
        Err(e) => {
            let mut stderr = err.finish();
            stderr.push_str(&format!("\nfailed to wait for sessh: {}", e));
            InvocationResult::exited(-1, out.finish(), stderr)
        }
    }
}

/// Write the payload, if any, then close stdin so sessh sees end-of-input.
async fn feed(stdin: Option<ChildStdin>, input: Option<&str>) {
    let Some(mut stdin) = stdin else {
        return;
    };

    if let Some(input) = input {
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            debug!(error = %e, "sessh closed stdin before input was written");
        }
    }
    drop(stdin);
}

async fn drain<R>(reader: Option<R>) -> OutputBuffer
where
    R: AsyncRead + Unpin,
{
    let mut buffer = OutputBuffer::new();
    let Some(mut reader) = reader else {
        return buffer;
    };

    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "Stopped reading sessh output");
                break;
            }
        }
    }
    buffer
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn from_status(status: ExitStatus, stdout: String, stderr: String) -> InvocationResult {
    if let Some(code) = status.code() {
        return InvocationResult::exited(code, stdout, stderr);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return InvocationResult::signaled(signal, stdout, stderr);
        }
    }

    InvocationResult::exited(-1, stdout, stderr)
}

/// Fail when sessh produced nothing usable.
///
/// A non-zero exit is tolerated as long as stdout is non-empty, since
/// sessh may warn on stderr while still printing valid JSON.
pub fn ensure_ok(op: &str, result: &InvocationResult) -> Result<()> {
    match result.termination {
        Termination::Cancelled => return Err(ToolError::Cancelled(op.to_string())),
        Termination::TimedOut { after_ms } => {
            return Err(ToolError::Timeout {
                op: op.to_string(),
                after_ms,
            })
        }
        _ => {}
    }

    if result.exit_code != 0 && result.stdout.is_empty() {
        let message = if result.stderr.is_empty() {
            format!("sessh {} failed with {}", op, result.exit_code)
        } else {
            result.stderr.clone()
        };
        return Err(ToolError::InvocationFailed(message));
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn sh(script: &str) -> InvocationRequest {
        InvocationRequest::new(vec!["-c".to_string(), script.to_string()])
    }

    fn shell() -> SesshInvoker {
        SesshInvoker::new("/bin/sh")
    }

    #[test]
    fn test_output_buffer_joins_split_utf8() {
        let bytes = "héllo".as_bytes();
        let mut buffer = OutputBuffer::new();
        buffer.push(&bytes[..2]);
        buffer.push(&bytes[2..]);
        buffer.push(&[]);
        assert_eq!(buffer.len(), bytes.len());
        assert_eq!(buffer.finish(), "héllo");
    }

    #[tokio::test]
    async fn test_invoke_captures_streams_and_exit_code() {
        let result = shell()
            .invoke(
                &sh("echo '  out  '; echo err >&2; exit 3"),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert_eq!(result.termination, Termination::Exited(3));
    }

    #[tokio::test]
    async fn test_invoke_sets_json_env() {
        let result = shell()
            .invoke(&sh("printf %s \"$SESSH_JSON\""), &CancellationToken::new())
            .await;
        assert_eq!(result.stdout, "1");
    }

    #[tokio::test]
    async fn test_invoke_writes_input_then_closes() {
        let request = sh("cat").with_input("payload line");
        let result = shell().invoke(&request, &CancellationToken::new()).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "payload line");
    }

    #[tokio::test]
    async fn test_invoke_without_input_signals_eof() {
        let result = shell().invoke(&sh("cat"), &CancellationToken::new()).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_result() {
        let invoker = SesshInvoker::new("/nonexistent/sessh-binary");
        let result = invoker
            .invoke(&InvocationRequest::new(vec!["status".into()]), &CancellationToken::new())
            .await;
        assert_eq!(result.termination, Termination::SpawnFailed);
        assert_eq!(result.exit_code, 127);
        assert!(result.stderr.contains("/nonexistent/sessh-binary"));

        let err = assert_err!(ensure_ok("status", &result));
        assert_eq!(err.to_string(), result.stderr);
    }

    #[tokio::test]
    async fn test_signal_reports_distinct_exit_code() {
        let result = shell()
            .invoke(&sh("kill -TERM $$"), &CancellationToken::new())
            .await;
        assert_eq!(result.termination, Termination::Signaled(15));
        assert_eq!(result.exit_code, 143);
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = shell().invoke(&sh("exec sleep 30"), &cancel).await;
        assert_eq!(result.termination, Termination::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(ensure_ok("run", &result), Err(ToolError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let invoker = shell().with_timeout(Duration::from_millis(100));
        let result = invoker.invoke(&sh("exec sleep 30"), &CancellationToken::new()).await;
        assert_eq!(result.termination, Termination::TimedOut { after_ms: 100 });
        assert!(matches!(
            ensure_ok("logs", &result),
            Err(ToolError::Timeout { after_ms: 100, .. })
        ));
    }

    #[test]
    fn test_ensure_ok_uses_stderr() {
        let result = InvocationResult::exited(2, "", "  no such session \n");
        let err = assert_err!(ensure_ok("status", &result));
        assert_eq!(err.to_string(), "no such session");
    }

    #[test]
    fn test_ensure_ok_synthesizes_message() {
        let result = InvocationResult::exited(2, "", "");
        let err = assert_err!(ensure_ok("close", &result));
        assert_eq!(err.to_string(), "sessh close failed with 2");
    }

    #[test]
    fn test_ensure_ok_tolerates_nonzero_with_stdout() {
        let result = InvocationResult::exited(1, "{\"ok\":false}", "warning");
        assert_ok!(ensure_ok("open", &result));
    }

    #[test]
    fn test_ensure_ok_accepts_clean_exit_without_output() {
        let result = InvocationResult::exited(0, "", "");
        assert_ok!(ensure_ok("close", &result));
    }
}
