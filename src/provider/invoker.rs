use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{estimate_tokens, extract_marked_payload};
use crate::config::ProviderSpec;
use crate::error::InvokeError;
use crate::sanitize;

/// How long a timed-out subprocess gets between the termination signal and
/// the hard kill.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Result of one successful CLI invocation. All text has already passed
/// through the ASCII sanitizer.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub stdout: String,
    /// Payload between the provider's JSON markers, when present.
    pub payload: Option<String>,
    pub exit_code: i32,
    pub elapsed: Duration,
    /// Estimated tokens for prompt plus output, for usage accounting.
    pub tokens_estimate: u64,
}

impl InvokeOutcome {
    /// The structured payload if markers matched, otherwise the full prose.
    pub fn text(&self) -> &str {
        self.payload.as_deref().unwrap_or(&self.stdout)
    }
}

/// Single-shot subprocess executor for LLM CLI tools.
///
/// Spawns with an explicit argument vector (never through a shell), writes
/// the sanitized prompt to stdin, closes stdin, and reads both output
/// streams to completion under a hard wall-clock deadline.
#[derive(Debug, Clone, Default)]
pub struct CliInvoker;

impl CliInvoker {
    pub fn new() -> Self {
        Self
    }

    pub async fn invoke(
        &self,
        spec: &ProviderSpec,
        prompt: &str,
        timeout: Duration,
    ) -> Result<InvokeOutcome, InvokeError> {
        let argv = spec.argv();
        let command = argv
            .first()
            .cloned()
            .ok_or_else(|| InvokeError::CliNotFound {
                command: "<empty command vector>".to_string(),
            })?;

        let outbound = format!("{}{}", sanitize::sanitize(prompt), sanitize::ascii_prompt_preamble());

        debug!(command = %command, timeout_secs = timeout.as_secs(), "Invoking CLI");
        let start = Instant::now();

        let mut child = Command::new(&command)
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InvokeError::CliNotFound { command: command.clone() }
                } else {
                    InvokeError::CliFailed {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("spawn failed: {}", e),
                    }
                }
            })?;

        // Readers must be draining before the prompt goes in, or a large
        // prompt and a chatty tool can deadlock on full pipes.
        let (stdout_task, stdout_buf) = spawn_stdout_reader(child.stdout.take());
        let (stderr_task, stderr_buf) = spawn_stderr_reader(child.stderr.take());

        // Feed the prompt and close stdin so the tool sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(outbound.as_bytes()).await {
                warn!(error = %e, "Failed to write prompt to stdin");
            }
            drop(stdin);
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(InvokeError::CliFailed {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("wait failed: {}", e),
                });
            }
            Err(_) => {
                let partial = reap_after_deadline(&mut child, &stdout_buf).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(InvokeError::Timeout {
                    elapsed: start.elapsed(),
                    partial_stdout: partial,
                });
            }
        };

        // Streams close once the child exits; collect what the readers saw.
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        let elapsed = start.elapsed();

        let raw_stdout = String::from_utf8_lossy(&stdout_buf.lock().await).into_owned();
        let raw_stderr = String::from_utf8_lossy(&stderr_buf.lock().await).into_owned();

        let stdout = sanitize::sanitize(&raw_stdout);
        if !sanitize::is_clean(&stdout) {
            return Err(InvokeError::Encoding {
                detail: "output not representable as ASCII after sanitization".to_string(),
            });
        }

        if !status.success() {
            return Err(InvokeError::CliFailed {
                exit_code: status.code(),
                stdout,
                stderr: sanitize::sanitize(&raw_stderr),
            });
        }

        let payload = extract_marked_payload(&stdout, spec).map(str::to_string);
        let tokens_estimate = estimate_tokens(&outbound) + estimate_tokens(&stdout);

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_bytes = stdout.len(),
            has_payload = payload.is_some(),
            "CLI invocation completed"
        );

        Ok(InvokeOutcome {
            stdout,
            payload,
            exit_code: status.code().unwrap_or(0),
            elapsed,
            tokens_estimate,
        })
    }

    /// One-shot connectivity test with a trivial prompt and a short deadline.
    pub async fn probe(&self, spec: &ProviderSpec) -> bool {
        let prompt = "Respond with the single word OK.";
        match self.invoke(spec, prompt, Duration::from_secs(30)).await {
            Ok(outcome) => outcome.stdout.to_lowercase().contains("ok"),
            Err(e) => {
                warn!(error = %e, "Provider probe failed");
                false
            }
        }
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn spawn_stdout_reader(stream: Option<ChildStdout>) -> (JoinHandle<()>, SharedBuf) {
    let buf: SharedBuf = Arc::new(Mutex::new(Vec::new()));
    let task_buf = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        if let Some(mut stream) = stream {
            read_into(&mut stream, task_buf).await;
        }
    });
    (task, buf)
}

fn spawn_stderr_reader(stream: Option<ChildStderr>) -> (JoinHandle<()>, SharedBuf) {
    let buf: SharedBuf = Arc::new(Mutex::new(Vec::new()));
    let task_buf = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        if let Some(mut stream) = stream {
            read_into(&mut stream, task_buf).await;
        }
    });
    (task, buf)
}

/// Read a stream chunk-wise into a shared buffer so partial output survives
/// a deadline expiry.
async fn read_into<R: AsyncReadExt + Unpin>(stream: &mut R, buf: SharedBuf) {
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Deadline expiry: termination signal, short grace, then hard kill.
/// Returns whatever stdout had accumulated, sanitized.
async fn reap_after_deadline(child: &mut Child, stdout_buf: &SharedBuf) -> String {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a live child we own; SIGTERM on a stale pid
        // is at worst a no-op error return.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    let exited = tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok();
    if !exited {
        warn!("Subprocess ignored termination signal; killing");
        let _ = child.kill().await;
    }

    let partial = String::from_utf8_lossy(&stdout_buf.lock().await).into_owned();
    sanitize::sanitize(&partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_provider(script: &str) -> ProviderSpec {
        ProviderSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let invoker = CliInvoker::new();
        let spec = shell_provider("cat >/dev/null; echo OK");
        let outcome = invoker
            .invoke(&spec, "say ok", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "OK");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.tokens_estimate > 0);
    }

    #[tokio::test]
    async fn stdin_reaches_the_tool() {
        let invoker = CliInvoker::new();
        // The tool echoes its stdin back; the prompt must arrive sanitized.
        let spec = shell_provider("cat");
        let outcome = invoker
            .invoke(&spec, "ping \u{2192} pong", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.stdout.contains("ping -> pong"));
        assert!(sanitize::is_clean(&outcome.stdout));
    }

    #[tokio::test]
    async fn timeout_reports_partial_stdout() {
        let invoker = CliInvoker::new();
        let spec = shell_provider("cat >/dev/null; echo partial; sleep 30");
        let err = invoker
            .invoke(&spec, "hang", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            InvokeError::Timeout {
                partial_stdout,
                elapsed,
            } => {
                assert!(partial_stdout.contains("partial"));
                assert!(elapsed >= Duration::from_secs(1));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_cli_not_found() {
        let invoker = CliInvoker::new();
        let spec = ProviderSpec::new(vec!["definitely-not-a-real-binary-9a7f".to_string()]);
        let err = invoker
            .invoke(&spec, "hi", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::CliNotFound { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn nonzero_exit_is_cli_failed() {
        let invoker = CliInvoker::new();
        let spec = shell_provider("cat >/dev/null; echo oops >&2; exit 3");
        let err = invoker
            .invoke(&spec, "fail", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            InvokeError::CliFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("oops"));
            }
            other => panic!("expected CliFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn marked_payload_is_extracted() {
        let invoker = CliInvoker::new();
        let spec = shell_provider(
            "cat >/dev/null; echo 'prose BEGIN_JSON {\"a\":1} END_JSON more prose'",
        );
        let outcome = invoker
            .invoke(&spec, "plan", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.payload.as_deref(), Some("{\"a\":1}"));
        assert_eq!(outcome.text(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn unicode_output_is_sanitized() {
        let invoker = CliInvoker::new();
        let spec = shell_provider("cat >/dev/null; printf 'done \\xe2\\x9c\\x85\\n'");
        let outcome = invoker
            .invoke(&spec, "go", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "done [PASS]");
    }
}
