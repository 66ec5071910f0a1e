//! Docker Execution
//!
//! Runs each task in a fresh `docker run --rm` container with the
//! task's CPU and memory reservation applied as runtime limits.
//!
//! # Binary Resolution
//!
//! The docker client is resolved in the following order:
//! 1. `NEXRUNNER_DOCKER` environment variable
//! 2. System PATH (`which docker`)
//! 3. Plain `docker`, left to the OS to find

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use super::process::{
    create_execution_script, invocation_name, remove_script, script_dir, supervise, Supervision,
};
use super::{CancelToken, ContainerAdapter, ExecutionError, ExecutionRequest, ExecutionResult};

/// Exit status docker uses when it fails before the command starts.
const DOCKER_ERROR_EXIT: i32 = 125;

/// Messages docker prints when the daemon cannot be reached.
const DAEMON_UNREACHABLE: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "Is the docker daemon running",
    "error during connect",
];

/// Lazily-resolved path to the docker client.
pub static DOCKER_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(path) = std::env::var("NEXRUNNER_DOCKER") {
        if !path.trim().is_empty() {
            info!("Using docker from NEXRUNNER_DOCKER: {}", path);
            return PathBuf::from(path);
        }
    }

    if let Ok(output) = Command::new("which").arg("docker").output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                info!("Using system docker: {}", path_str);
                return PathBuf::from(path_str);
            }
        }
    }

    warn!("docker binary not found on PATH");
    PathBuf::from("docker")
});

/// Adapter that runs each command inside a container.
#[derive(Debug, Clone)]
pub struct DockerAdapter {
    binary: PathBuf,
    image: String,
    run_options: Vec<String>,
    script_dir: PathBuf,
}

impl DockerAdapter {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            binary: DOCKER_PATH.clone(),
            image: image.into(),
            run_options: Vec::new(),
            script_dir: script_dir(),
        }
    }

    /// Uses a specific docker client binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Extra `docker run` arguments, split like a shell would.
    pub fn with_run_options(mut self, options: Option<String>) -> Self {
        self.run_options = options.as_deref().map(split_arguments).unwrap_or_default();
        self
    }

    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Arguments of the `docker run` call for one task, run in a
    /// container called `name`.
    ///
    /// Every mount is bound at the same path inside the container, so
    /// absolute paths in the command work unchanged.
    pub fn build_args(&self, request: &ExecutionRequest, script: &Path, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--cpus".to_string(),
            request.cpus.to_string(),
        ];

        if request.memory.bytes() > 0 {
            args.push("--memory".to_string());
            args.push(format!("{}b", request.memory.bytes()));
        }

        let mut mounts: BTreeSet<&Path> = request.mounts.iter().map(PathBuf::as_path).collect();
        mounts.insert(request.work_dir.as_path());
        if let Some(dir) = script.parent() {
            mounts.insert(dir);
        }
        for mount in mounts {
            args.push("-v".to_string());
            args.push(format!("{0}:{0}", mount.display()));
        }

        args.push("-w".to_string());
        args.push(request.work_dir.display().to_string());
        args.extend(self.run_options.iter().cloned());
        args.push(self.image.clone());
        args.push("bash".to_string());
        args.push(script.display().to_string());
        args
    }

    fn kill_container(&self, name: &str) {
        debug!("Killing container {}", name);
        let _ = Command::new(&self.binary)
            .arg("kill")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

impl ContainerAdapter for DockerAdapter {
    fn name(&self) -> &str {
        "docker"
    }

    fn probe(&self) -> Result<(), ExecutionError> {
        let output = Command::new(&self.binary)
            .arg("info")
            .arg("--format")
            .arg("{{.ServerVersion}}")
            .output()
            .map_err(|e| {
                ExecutionError::ContainerUnavailable(format!(
                    "cannot run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            info!("Docker daemon available (server {})", version.trim());
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ExecutionError::ContainerUnavailable(stderr.trim().to_string()))
        }
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let invocation = invocation_name(&request.task_id);
        let script_path = create_execution_script(&self.script_dir, &invocation, &request.command)
            .map_err(|e| ExecutionError::Spawn(format!("cannot write script: {}", e)))?;

        let name = container_name(&invocation);
        let mut command = Command::new(&self.binary);
        command.args(self.build_args(request, &script_path, &name));
        debug!("Executing '{}' in container {} ({})", request.task_id, name, self.image);

        let on_kill = || self.kill_container(&name);
        let outcome = supervise(
            command,
            Supervision {
                timeout: request.timeout,
                cancel,
                // The client process is not where the work happens
                sample_usage: false,
                on_kill: &on_kill,
            },
        );
        remove_script(&script_path);

        let supervised = match outcome {
            Err(ExecutionError::Spawn(message)) => {
                return Err(ExecutionError::ContainerUnavailable(message))
            }
            other => other?,
        };

        if supervised.exit_code == DOCKER_ERROR_EXIT && is_daemon_unreachable(&supervised.stderr) {
            return Err(ExecutionError::ContainerUnavailable(
                supervised.stderr.trim().to_string(),
            ));
        }
        supervised.into_result()
    }
}

/// Container name for one task execution.
pub fn container_name(invocation: &str) -> String {
    format!("nexrunner-{}", invocation)
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    DAEMON_UNREACHABLE.iter().any(|needle| stderr.contains(needle))
}

/// Splits an option string on whitespace, keeping quoted runs together.
fn split_arguments(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
