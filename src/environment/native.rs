//! Native Execution
//!
//! Runs task commands with bash directly on the host.

use std::path::PathBuf;
use std::process::Command;

use log::debug;

use super::process::{
    create_execution_script, invocation_name, remove_script, script_dir, supervise, Supervision,
};
use super::{CancelToken, ContainerAdapter, ExecutionError, ExecutionRequest, ExecutionResult};

/// Adapter that runs commands on the host.
#[derive(Debug, Clone)]
pub struct NativeAdapter {
    shell: PathBuf,
    script_dir: PathBuf,
    sample_usage: bool,
}

impl NativeAdapter {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("bash"),
            script_dir: script_dir(),
            sample_usage: true,
        }
    }

    /// Writes generated scripts somewhere other than the temp directory.
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    /// Enables or disables sysinfo sampling of the task's process tree.
    pub fn with_usage_sampling(mut self, enabled: bool) -> Self {
        self.sample_usage = enabled;
        self
    }
}

impl Default for NativeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerAdapter for NativeAdapter {
    fn name(&self) -> &str {
        "native"
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let invocation = invocation_name(&request.task_id);
        let script_path = create_execution_script(&self.script_dir, &invocation, &request.command)
            .map_err(|e| ExecutionError::Spawn(format!("cannot write script: {}", e)))?;

        let mut command = Command::new(&self.shell);
        command.arg(&script_path).current_dir(&request.work_dir);
        debug!(
            "Executing '{}' in directory: {}",
            request.task_id,
            request.work_dir.display()
        );

        let outcome = supervise(
            command,
            Supervision {
                timeout: request.timeout,
                cancel,
                sample_usage: self.sample_usage,
                on_kill: &|| {},
            },
        );
        remove_script(&script_path);

        outcome?.into_result()
    }
}
