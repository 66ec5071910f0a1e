//! Task Preparation
//!
//! Turns a task into an [`ExecutionRequest`]:
//! - `{params.NAME}` placeholder substitution
//! - Mount and working directory selection
//! - Output directory creation

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use super::admission::ResourceRequest;
use crate::config::{ParamNamespace, Settings};
use crate::environment::ExecutionRequest;
use crate::workflow::Task;

const PARAM_OPEN: &str = "{params.";

/// Replaces `{params.NAME}` placeholders with resolved parameters.
///
/// Any other text, including other braces, is passed through verbatim.
/// Returns the name of the first parameter that is not defined.
///
/// ```
/// use nexrunner::config::{parse_config, resolve, ResolveContext};
/// use nexrunner::execution::step::render_command;
///
/// let raw = parse_config("params { outdir = '/x/results' }").unwrap();
/// let settings = resolve(&raw, &ResolveContext::new("/x", "/x")).unwrap();
///
/// let command = render_command("ls {params.outdir}", &settings.params).unwrap();
/// assert_eq!(command, "ls /x/results");
/// ```
pub fn render_command(command: &str, params: &ParamNamespace) -> Result<String, String> {
    let mut out = String::with_capacity(command.len());
    let mut rest = command;

    while let Some(open) = rest.find(PARAM_OPEN) {
        let after = &rest[open + PARAM_OPEN.len()..];
        let Some(close) = after.find('}') else {
            break;
        };
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            out.push_str(&rest[..open + 1]);
            rest = &rest[open + 1..];
            continue;
        }

        let value = params.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Host directories a task must see: the base directory, the input
/// (its parent when it is not a directory) and the output directory.
pub fn mount_points(settings: &Settings) -> Vec<PathBuf> {
    let mut mounts = vec![settings.base_dir.clone()];

    if let Some(input) = settings.params.input() {
        let input = param_path(settings, input);
        if input.is_dir() {
            mounts.push(input);
        } else if let Some(parent) = input.parent().filter(|p| !p.as_os_str().is_empty()) {
            mounts.push(parent.to_path_buf());
        }
    }
    if let Some(outdir) = settings.params.outdir() {
        mounts.push(param_path(settings, outdir));
    }

    mounts.sort();
    mounts.dedup();
    mounts
}

/// Builds the adapter request for one task.
pub fn prepare_request(
    task: &Task,
    request: ResourceRequest,
    settings: &Settings,
    mounts: &[PathBuf],
) -> Result<ExecutionRequest, String> {
    let command = render_command(&task.command, &settings.params)?;
    debug!("Task '{}' command: {}", task.id, command);

    Ok(ExecutionRequest {
        task_id: task.id.clone(),
        command,
        work_dir: settings.base_dir.clone(),
        cpus: request.cpus,
        memory: request.memory,
        mounts: mounts.to_vec(),
        // Applied by the admission controller at dispatch
        timeout: None,
    })
}

/// Creates the `params.outdir` directory if one is configured.
pub fn ensure_output_directory(settings: &Settings) -> io::Result<Option<PathBuf>> {
    let Some(outdir) = settings.params.outdir() else {
        return Ok(None);
    };

    let path = param_path(settings, outdir);
    if !path.exists() {
        fs::create_dir_all(&path)?;
        debug!("Created directory: {}", path.display());
    }
    Ok(Some(path))
}

/// A path-valued parameter, relative values taken from the base directory.
fn param_path(settings: &Settings, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        settings.base_dir.join(path)
    }
}

/// Dry-run description of a prepared request.
pub fn describe(request: &ExecutionRequest, adapter: &str) -> String {
    let mut text = format!(
        "[DRY RUN] Task: {}\n  Executor: {}\n  Command: {}\n  CPUs: {}\n  Memory: {}\n  Workdir: {}",
        request.task_id,
        adapter,
        request.command,
        request.cpus,
        request.memory,
        request.work_dir.display()
    );
    if adapter == "docker" {
        let mounts: Vec<String> = request.mounts.iter().map(|m| m.display().to_string()).collect();
        text.push_str(&format!("\n  Mounts: {}", mounts.join(", ")));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve, MemorySize, ResolveContext};
    use tempfile::tempdir;

    fn settings(text: &str, base: &Path) -> Settings {
        let raw = parse_config(text).unwrap();
        resolve(&raw, &ResolveContext::new(base, base)).unwrap()
    }

    #[test]
    fn test_render_command() {
        let s = settings(
            "params { input = '/data/in.csv'\n outdir = '/data/out' }",
            Path::new("/w"),
        );
        let command =
            render_command("run.py {params.input} -o {params.outdir}/x {other}", &s.params)
                .unwrap();
        assert_eq!(command, "run.py /data/in.csv -o /data/out/x {other}");
    }

    #[test]
    fn test_render_command_unknown_param() {
        let s = settings("params { outdir = '/o' }", Path::new("/w"));
        assert_eq!(
            render_command("echo {params.missing}", &s.params),
            Err("missing".to_string())
        );
    }

    #[test]
    fn test_render_command_passes_through_shell_braces() {
        let s = settings("params { outdir = '/o' }", Path::new("/w"));
        let command = "for f in {a,b}; do echo ${f} {params.}; done";
        assert_eq!(render_command(command, &s.params).unwrap(), command);
    }

    #[test]
    fn test_mount_points() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path();
        let data = base.join("data");
        fs::create_dir_all(&data).unwrap();

        let s = settings(
            "params { input = \"$baseDir/data/forests.csv\"\n outdir = \"$baseDir/results\" }",
            base,
        );
        let mounts = mount_points(&s);

        assert_eq!(mounts, vec![base.to_path_buf(), data, base.join("results")]);
    }

    #[test]
    fn test_mount_points_input_directory() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path();
        let s = settings("params { input = \"$baseDir\" }", base);
        assert_eq!(mount_points(&s), vec![base.to_path_buf()]);
    }

    #[test]
    fn test_prepare_request() {
        let s = settings("params { outdir = '/o' }", Path::new("/w"));
        let task = Task::new("plot", "plot.py {params.outdir}");
        let request = prepare_request(
            &task,
            ResourceRequest::new(2, MemorySize::parse("1 GB").unwrap()),
            &s,
            &mount_points(&s),
        )
        .unwrap();

        assert_eq!(request.command, "plot.py /o");
        assert_eq!(request.work_dir, PathBuf::from("/w"));
        assert_eq!(request.cpus, 2);
        assert_eq!(request.timeout, None);
        assert_eq!(request.mounts, vec![PathBuf::from("/o"), PathBuf::from("/w")]);
    }

    #[test]
    fn test_ensure_output_directory() {
        let temp_dir = tempdir().unwrap();
        let s = settings("params { outdir = \"$baseDir/a/b\" }", temp_dir.path());

        let created = ensure_output_directory(&s).unwrap();
        assert_eq!(created, Some(temp_dir.path().join("a/b")));
        assert!(temp_dir.path().join("a/b").is_dir());
    }

    #[test]
    fn test_relative_outdir_is_under_base_dir() {
        let temp_dir = tempdir().unwrap();
        let s = settings("params { outdir = 'results' }", temp_dir.path());

        let created = ensure_output_directory(&s).unwrap();
        assert_eq!(created, Some(temp_dir.path().join("results")));
        assert!(mount_points(&s).contains(&temp_dir.path().join("results")));
    }

    #[test]
    fn test_ensure_output_directory_without_outdir() {
        let s = settings("params { input = '/i' }", Path::new("/w"));
        assert_eq!(ensure_output_directory(&s).unwrap(), None);
    }

    #[test]
    fn test_describe() {
        let request = ExecutionRequest {
            task_id: "prep".to_string(),
            command: "echo hi".to_string(),
            work_dir: PathBuf::from("/w"),
            cpus: 1,
            memory: MemorySize::ZERO,
            mounts: vec![PathBuf::from("/w")],
            timeout: None,
        };
        let text = describe(&request, "docker");
        assert!(text.contains("[DRY RUN] Task: prep"));
        assert!(text.contains("Mounts: /w"));
        assert!(!describe(&request, "native").contains("Mounts"));
    }
}
