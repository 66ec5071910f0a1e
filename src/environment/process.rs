//! Child Process Supervision
//!
//! Script generation and the poll loop shared by every adapter: output
//! capture, timeout, cancellation and usage sampling.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{CancelToken, ExecutionError, ExecutionResult};
use crate::monitoring::{ProcessMonitor, UsageSummary};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static NEXT_INVOCATION: AtomicU64 = AtomicU64::new(0);

/// Directory generated task scripts are written to.
pub fn script_dir() -> PathBuf {
    std::env::temp_dir().join("nexrunner_scripts")
}

/// Name for one execution of a task, unique across every run in this
/// process and across processes.
///
/// Task IDs alone are not enough: distinct IDs may sanitize to the same
/// text, and two engines may run a task with the same ID.
pub fn invocation_name(task_id: &str) -> String {
    let sequence = NEXT_INVOCATION.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), sequence, sanitize_name(task_id))
}

/// Writes a bash script running `command_text` and returns its path.
///
/// `invocation` must come from [`invocation_name`]. An existing file is
/// never overwritten.
pub fn create_execution_script(
    dir: &Path,
    invocation: &str,
    command_text: &str,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let script_path = dir.join(format!("task_{}.sh", invocation));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command_text)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

/// Removes a generated script, logging instead of failing.
pub fn remove_script(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to clean up script {}: {}", path.display(), e);
    }
}

/// Replaces characters that are unsafe in file and container names.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// What a supervised child left behind.
#[derive(Debug, Clone, Default)]
pub struct Supervised {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub usage: Option<UsageSummary>,
}

impl Supervised {
    /// Maps the exit code onto the adapter result contract.
    pub fn into_result(self) -> Result<ExecutionResult, ExecutionError> {
        if self.exit_code == 0 {
            Ok(ExecutionResult {
                exit_code: 0,
                stdout: self.stdout,
                stderr: self.stderr,
                usage: self.usage,
            })
        } else {
            Err(ExecutionError::NonZeroExit {
                exit_code: self.exit_code,
                stderr: self.stderr,
                usage: self.usage,
            })
        }
    }
}

/// Options for [`supervise`].
pub struct Supervision<'a> {
    pub timeout: Option<Duration>,
    pub cancel: &'a CancelToken,
    pub sample_usage: bool,
    /// Extra cleanup run before the child is killed, such as stopping a
    /// container the child started
    pub on_kill: &'a dyn Fn(),
}

/// Spawns `command` and waits for it, honoring timeout and cancellation.
///
/// The child runs in its own process group so that killing it also
/// stops anything the script started.
pub fn supervise(mut command: Command, options: Supervision<'_>) -> Result<Supervised, ExecutionError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::Spawn(e.to_string()))?;
    debug!("Spawned process {}", child.id());

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());
    let mut monitor = options
        .sample_usage
        .then(|| ProcessMonitor::new(child.id()));
    let started = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill_tree(&mut child);
                return Err(ExecutionError::Spawn(e.to_string()));
            }
        }

        if options.cancel.is_cancelled() {
            debug!("Cancelled; killing process {}", child.id());
            (options.on_kill)();
            kill_tree(&mut child);
            return Err(ExecutionError::Cancelled);
        }

        if let Some(limit) = options.timeout {
            if started.elapsed() >= limit {
                warn!("Process {} exceeded timeout of {:?}", child.id(), limit);
                (options.on_kill)();
                kill_tree(&mut child);
                return Err(ExecutionError::Timeout(limit));
            }
        }

        if let Some(monitor) = monitor.as_mut() {
            monitor.sample();
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Supervised {
        exit_code: exit_code(status),
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
        usage: monitor.map(|m| m.summary()),
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Exit code, with death by signal N reported as 128 + N.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Kills the child's process group, then reaps the child.
///
/// The group ID equals the child's PID because the child was spawned as
/// a group leader.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match i32::try_from(child.id()) {
            Ok(pgid) => {
                if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                    warn!("Failed to kill process group {}: {}", pgid, e);
                }
            }
            Err(_) => warn!("Process ID {} is out of range for a process group", child.id()),
        }
    }
    if let Err(e) = child.kill() {
        debug!("Process {} already gone: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap process {}: {}", child.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options<'a>(cancel: &'a CancelToken, timeout: Option<Duration>) -> Supervision<'a> {
        Supervision {
            timeout,
            cancel,
            sample_usage: false,
            on_kill: &|| {},
        }
    }

    fn bash(script: &str) -> Command {
        let mut command = Command::new("bash");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_create_execution_script() {
        let temp_dir = tempdir().unwrap();
        let script_path = create_execution_script(
            temp_dir.path(),
            &invocation_name("prep"),
            "echo 'hello world'",
        )
        .unwrap();

        let content = fs::read_to_string(&script_path).unwrap();
        assert!(content.starts_with("#!/bin/bash\nset -e\n"));
        assert!(content.contains("echo 'hello world'"));

        remove_script(&script_path);
        assert!(!script_path.exists());
    }

    #[test]
    fn test_colliding_ids_get_distinct_scripts() {
        let temp_dir = tempdir().unwrap();
        assert_eq!(sanitize_name("x y"), sanitize_name("x_y"));

        let first =
            create_execution_script(temp_dir.path(), &invocation_name("x y"), "echo first")
                .unwrap();
        let second =
            create_execution_script(temp_dir.path(), &invocation_name("x_y"), "echo second")
                .unwrap();

        assert_ne!(first, second);
        assert!(fs::read_to_string(&first).unwrap().contains("echo first"));
        assert!(fs::read_to_string(&second).unwrap().contains("echo second"));
    }

    #[test]
    fn test_existing_script_is_not_overwritten() {
        let temp_dir = tempdir().unwrap();
        let name = invocation_name("prep");
        create_execution_script(temp_dir.path(), &name, "echo one").unwrap();

        let err = create_execution_script(temp_dir.path(), &name, "echo two").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("stage/1 a"), "stage_1_a");
        assert_eq!(sanitize_name("ok-name_2.x"), "ok-name_2.x");
    }

    #[test]
    fn test_supervise_captures_output() {
        let cancel = CancelToken::new();
        let out = supervise(bash("echo out; echo err >&2"), options(&cancel, None)).unwrap();

        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_supervise_non_zero_exit() {
        let cancel = CancelToken::new();
        let out = supervise(bash("exit 3"), options(&cancel, None)).unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(matches!(
            out.into_result(),
            Err(ExecutionError::NonZeroExit { exit_code: 3, .. })
        ));
    }

    #[test]
    fn test_supervise_signal_exit_code() {
        let cancel = CancelToken::new();
        let out = supervise(bash("kill -TERM $$"), options(&cancel, None)).unwrap();
        assert_eq!(out.exit_code, 128 + 15);
    }

    #[test]
    fn test_supervise_timeout() {
        let cancel = CancelToken::new();
        let started = Instant::now();
        let err = supervise(
            bash("sleep 30"),
            options(&cancel, Some(Duration::from_millis(200))),
        )
        .unwrap_err();

        assert_eq!(err, ExecutionError::Timeout(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_supervise_cancelled() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let killed = std::cell::Cell::new(false);
        let on_kill = || killed.set(true);
        let err = supervise(
            bash("sleep 30"),
            Supervision {
                timeout: None,
                cancel: &cancel,
                sample_usage: false,
                on_kill: &on_kill,
            },
        )
        .unwrap_err();
        handle.join().unwrap();

        assert_eq!(err, ExecutionError::Cancelled);
        assert!(killed.get());
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_timeout_kills_background_children() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("sleep.pid");
        let cancel = CancelToken::new();

        let err = supervise(
            bash(&format!("sleep 30 & echo $! > {}; wait", pid_file.display())),
            options(&cancel, Some(Duration::from_millis(500))),
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));

        let pid: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!is_alive(pid), "background sleep {} survived the kill", pid);
    }

    #[test]
    fn test_supervise_spawn_failure() {
        let cancel = CancelToken::new();
        let err = supervise(
            Command::new("/nonexistent/binary"),
            options(&cancel, None),
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn(_)));
    }
}
