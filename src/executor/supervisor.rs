//! Timeout supervisor
//!
//! Spawns one disposable worker process per execution request, applies
//! resource ceilings before exec, and enforces the wall-clock budget. The
//! worker's stdout pipe is the result channel: the shim driver emits
//! exactly one tagged reply line. Waiting is a blocking receive on that
//! pipe paired with a timer; deadline expiry terminates the worker
//! unconditionally, with a bounded join so a stalled teardown cannot hang
//! the supervisor.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::shim::{self, ReplyStatus, WorkerPayload, WorkerReply};
use super::{ExecutionOutcome, Executor};
use crate::config::GraderConfig;
use crate::verifier::truncate_output;

/// Diagnostic for a worker killed at the deadline
pub const TIMEOUT_MESSAGE: &str = "time limit exceeded, possible infinite loop";
/// Diagnostic for a worker that exited without producing a result
pub const UNKNOWN_FAILURE_MESSAGE: &str = "unknown error, no output";

/// Bounded join after signaling termination
const KILL_JOIN: Duration = Duration::from_millis(100);
/// Final grace period when the worker exits silently
const EXIT_GRACE: Duration = Duration::from_millis(50);

/// Max processes/threads for the worker's user (fork-bomb containment)
const WORKER_MAX_PROCESSES: u64 = 64;
/// Max file size the worker may create (256MB)
const WORKER_MAX_FSIZE_BYTES: u64 = 262_144 * 1024;

/// Supervisor that runs submissions in isolated worker processes
pub struct Supervisor {
    python_bin: String,
    time_limit: Duration,
    output_limit: usize,
}

impl Supervisor {
    pub fn new(python_bin: impl Into<String>, time_limit: Duration, output_limit: usize) -> Self {
        Self {
            python_bin: python_bin.into(),
            time_limit,
            output_limit,
        }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        Self::new(&config.python_bin, config.time_limit, config.output_limit)
    }

    /// Run one submission against one input script.
    ///
    /// Every outcome of the worker (result, raised error, silent crash,
    /// hang) maps to exactly one `ExecutionOutcome`; an `Err` here means
    /// the worker could not be spawned at all.
    pub async fn execute(&self, source: &str, input_script: &str) -> Result<ExecutionOutcome> {
        let mut cmd = Command::new(&self.python_bin);
        cmd.args(["-I", "-c", shim::DRIVER])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let cpu_backstop_secs = self.time_limit.as_secs().saturating_add(2);
            unsafe {
                cmd.pre_exec(move || apply_rlimits(cpu_backstop_secs));
            }
        }

        let mut child = cmd.spawn().context("Failed to spawn worker process")?;
        debug!("Spawned worker process for execution");

        let payload = serde_json::to_string(&WorkerPayload {
            code: source,
            input: input_script,
        })?;

        let mut stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .context("Worker process has no stdout pipe")?;
        let mut reader = BufReader::new(stdout);

        // Feed the payload and wait for the single reply line, all under
        // the wall-clock budget. Write errors are ignored: a worker that
        // died early shows up as EOF on the reply read.
        let waited = timeout(self.time_limit, async {
            if let Some(pipe) = stdin.as_mut() {
                let _ = pipe.write_all(payload.as_bytes()).await;
                let _ = pipe.shutdown().await;
            }
            drop(stdin.take());
            let mut line = String::new();
            let read = reader.read_line(&mut line).await;
            (read, line)
        })
        .await;

        let outcome = match waited {
            // Deadline elapsed while the worker was still alive
            Err(_) => {
                let _ = child.start_kill();
                if timeout(KILL_JOIN, child.wait()).await.is_err() {
                    warn!("Worker did not exit within the kill grace period");
                }
                ExecutionOutcome::TimedOut {
                    message: TIMEOUT_MESSAGE.to_string(),
                }
            }
            // Worker exited without producing a result
            Ok((Ok(0), _)) => {
                let _ = timeout(EXIT_GRACE, child.wait()).await;
                ExecutionOutcome::RuntimeFault {
                    message: UNKNOWN_FAILURE_MESSAGE.to_string(),
                }
            }
            // A reply line arrived before the deadline
            Ok((Ok(_), line)) => {
                let _ = timeout(EXIT_GRACE, child.wait()).await;
                match serde_json::from_str::<WorkerReply>(&line) {
                    Ok(reply) => self.outcome_from_reply(reply),
                    Err(e) => {
                        warn!("Unparseable worker reply: {}", e);
                        ExecutionOutcome::RuntimeFault {
                            message: UNKNOWN_FAILURE_MESSAGE.to_string(),
                        }
                    }
                }
            }
            Ok((Err(e), _)) => {
                warn!("Worker result channel read failed: {}", e);
                let _ = child.start_kill();
                let _ = timeout(KILL_JOIN, child.wait()).await;
                ExecutionOutcome::RuntimeFault {
                    message: UNKNOWN_FAILURE_MESSAGE.to_string(),
                }
            }
        };

        Ok(outcome)
    }

    fn outcome_from_reply(&self, reply: WorkerReply) -> ExecutionOutcome {
        let payload = truncate_output(&reply.payload, self.output_limit);
        match reply.status {
            ReplyStatus::Ok => ExecutionOutcome::Success { output: payload },
            ReplyStatus::Exc => ExecutionOutcome::RuntimeFault { message: payload },
        }
    }
}

#[async_trait]
impl Executor for Supervisor {
    async fn execute(&self, source: &str, input_script: &str) -> Result<ExecutionOutcome> {
        Supervisor::execute(self, source, input_script).await
    }
}

/// Resource ceilings applied in the worker between fork and exec
#[cfg(unix)]
fn apply_rlimits(cpu_backstop_secs: u64) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let set = |resource: Resource, limit: u64| {
        setrlimit(resource, limit, limit).map_err(std::io::Error::from)
    };

    // CPU backstop behind the wall-clock timer
    set(Resource::RLIMIT_CPU, cpu_backstop_secs)?;
    set(Resource::RLIMIT_NPROC, WORKER_MAX_PROCESSES)?;
    set(Resource::RLIMIT_FSIZE, WORKER_MAX_FSIZE_BYTES)?;
    set(Resource::RLIMIT_CORE, 0)?;
    Ok(())
}

/// Check that the submission interpreter is runnable; fail fast otherwise
pub async fn ensure_interpreter_available(python_bin: &str) -> Result<()> {
    let output = Command::new(python_bin)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to run {}", python_bin))?;

    if !output.status.success() {
        anyhow::bail!(
            "Interpreter {} is not runnable: {}",
            python_bin,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_supervisor(time_limit: Duration) -> Supervisor {
        Supervisor::new("python3", time_limit, 10_000)
    }

    #[tokio::test]
    async fn test_reads_input_script_and_captures_output() {
        let supervisor = test_supervisor(Duration::from_secs_f64(4.0));
        let outcome = supervisor
            .execute("a=int(input())\nb=int(input())\nprint(a+b)", "3\n4\n")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                output: "7\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_runtime_fault_carries_kind_and_message() {
        let supervisor = test_supervisor(Duration::from_secs_f64(4.0));
        let outcome = supervisor.execute("1/0", "").await.unwrap();
        match outcome {
            ExecutionOutcome::RuntimeFault { message } => {
                assert!(message.starts_with("ZeroDivisionError:"), "{}", message);
            }
            other => panic!("expected RuntimeFault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_input_is_a_fault_not_a_timeout() {
        let supervisor = test_supervisor(Duration::from_secs_f64(4.0));
        let outcome = supervisor.execute("a=input()", "").await.unwrap();
        match outcome {
            ExecutionOutcome::RuntimeFault { message } => {
                assert!(message.starts_with("EOFError:"), "{}", message);
                assert!(message.contains("input script exhausted"), "{}", message);
            }
            other => panic!("expected RuntimeFault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_within_budget() {
        let supervisor = test_supervisor(Duration::from_secs_f64(1.0));
        let start = Instant::now();
        let outcome = supervisor
            .execute("while True: pass", "")
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert_eq!(
            outcome,
            ExecutionOutcome::TimedOut {
                message: TIMEOUT_MESSAGE.to_string()
            }
        );
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_silent_exit_reports_unknown_failure() {
        let supervisor = test_supervisor(Duration::from_secs_f64(4.0));
        let outcome = supervisor
            .execute("import sys\nsys.exit(1)", "")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFault {
                message: UNKNOWN_FAILURE_MESSAGE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_output_is_truncated() {
        let supervisor = Supervisor::new("python3", Duration::from_secs_f64(4.0), 100);
        let outcome = supervisor
            .execute("print('x' * 500)", "")
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Success { output } => {
                assert!(output.ends_with(crate::verifier::TRUNCATION_MARKER));
                assert_eq!(
                    output.chars().count(),
                    100 + crate::verifier::TRUNCATION_MARKER.chars().count()
                );
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submission_runs_with_empty_environment() {
        let supervisor = test_supervisor(Duration::from_secs_f64(4.0));
        // Nothing but builtins in the top-level namespace
        let outcome = supervisor
            .execute("print(sorted(k for k in dir() if not k.startswith('__')))", "")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                output: "[]\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_interpreter_preflight() {
        assert!(ensure_interpreter_available("python3").await.is_ok());
        assert!(ensure_interpreter_available("definitely-not-an-interpreter")
            .await
            .is_err());
    }
}
