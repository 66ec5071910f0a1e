//! Execution Environment Module
//!
//! Runs a single task's command either directly on the host or inside a
//! container. The scheduler only sees the [`ContainerAdapter`] trait.
//!
//! # Structure
//!
//! - [`native`]: bash on the host
//! - [`docker`]: `docker run` per task
//! - [`process`]: child process supervision shared by both

pub mod docker;
pub mod native;
pub mod process;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{MemorySize, Settings};
use crate::monitoring::UsageSummary;

pub use docker::{DockerAdapter, DOCKER_PATH};
pub use native::NativeAdapter;

/// Everything an adapter needs to run one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub task_id: String,
    /// Command text after placeholder substitution
    pub command: String,
    /// Working directory of the command
    pub work_dir: PathBuf,
    pub cpus: usize,
    /// Zero means no limit is passed to the runtime
    pub memory: MemorySize,
    /// Host directories the command must be able to see
    pub mounts: Vec<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Outcome of a command that exited with status zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub usage: Option<UsageSummary>,
}

/// Reasons a task did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The command ran and exited with a non-zero status. Only this task fails.
    #[error("Command exited with code {exit_code}")]
    NonZeroExit {
        exit_code: i32,
        stderr: String,
        usage: Option<UsageSummary>,
    },

    /// The container runtime cannot be reached. Fatal to the whole run.
    #[error("Container runtime unavailable: {0}")]
    ContainerUnavailable(String),

    /// The command outlived the configured timeout and was killed.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The command was killed because the run was cancelled.
    #[error("Command cancelled")]
    Cancelled,

    /// The command could not be started.
    #[error("Failed to start command: {0}")]
    Spawn(String),
}

impl ExecutionError {
    /// True for errors that must stop the whole run, not just one task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContainerUnavailable(_))
    }
}

/// Shared cancellation flag handed to every running task.
#[derive(Debug, Clone, Default)]
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

/// Runs task commands in some environment.
///
/// Implementations are called from worker threads, never from the
/// scheduling thread.
pub trait ContainerAdapter: Send + Sync {
    /// Short name used in logs and the report.
    fn name(&self) -> &str;

    /// Checks that the environment is usable before any task is dispatched.
    fn probe(&self) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// Runs one command to completion.
    ///
    /// Returns `Ok` only for exit status zero. Must return promptly with
    /// [`ExecutionError::Cancelled`] once `cancel` is set.
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Picks the adapter the settings ask for.
pub fn adapter_for(settings: &Settings) -> Arc<dyn ContainerAdapter> {
    match settings.process.container.as_ref() {
        Some(image) if settings.docker.enabled => Arc::new(
            DockerAdapter::new(image.clone()).with_run_options(settings.docker.run_options.clone()),
        ),
        _ => Arc::new(NativeAdapter::new()),
    }
}
