//! Executor module - Isolated execution of submitted code
//!
//! One OS child process per execution request. The `Supervisor` owns the
//! spawn/deadline/kill lifecycle; the shim driver running inside the child
//! owns I/O virtualization. This module does NOT:
//! - Compare outputs or determine verdicts
//! - Know about bundles or exercises

pub mod shim;
pub mod supervisor;

use anyhow::Result;
use async_trait::async_trait;

/// Universal result of one worker invocation.
///
/// Four distinct failure modes (success, raised error, silent crash, hang)
/// collapse into these three variants; a silent crash surfaces as a
/// `RuntimeFault` with a generic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Submission ran to completion; verdict depends on output verification
    Success { output: String },
    /// Submission raised an error (kind + message only, never a stack trace)
    RuntimeFault { message: String },
    /// Wall-clock budget exceeded; the worker was forcibly terminated
    TimedOut { message: String },
}

/// Trait for executing one submission against one input script
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, source: &str, input_script: &str) -> Result<ExecutionOutcome>;
}

// Re-exports
pub use supervisor::Supervisor;
