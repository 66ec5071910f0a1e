//! Settings Resolution
//!
//! Turns raw configuration blocks into an immutable, fully resolved
//! [`Settings`] value. Resolution is a pure function of the raw blocks
//! and the [`ResolveContext`]; nothing is read from global state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use sysinfo::System;

use super::error::ConfigError;
use super::interpolate::{has_placeholders, interpolate, Bindings};
use super::parser::{ConfigValue, RawConfig};
use super::units::{parse_duration, MemorySize};

/// Fully resolved option tree: section -> option -> value.
///
/// Unknown sections and options are kept so they can be passed through.
pub type SettingsTree = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// Directories that seed the environment bindings for interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// Directory holding the configuration; bound as `baseDir` and `projectDir`.
    pub base_dir: PathBuf,
    /// Directory the run was launched from; bound as `launchDir`.
    pub launch_dir: PathBuf,
}

impl ResolveContext {
    pub fn new(base_dir: impl Into<PathBuf>, launch_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            launch_dir: launch_dir.into(),
        }
    }

    fn bindings(&self) -> Bindings {
        let base = self.base_dir.display().to_string();
        let mut env = BTreeMap::new();
        env.insert("baseDir".to_string(), base.clone());
        env.insert("projectDir".to_string(), base);
        env.insert("launchDir".to_string(), self.launch_dir.display().to_string());
        Bindings::new(env)
    }
}

/// Resolved parameter namespace (`params.*`). Read-only after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamNamespace(BTreeMap<String, String>);

impl ParamNamespace {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The conventional input location, if set.
    pub fn input(&self) -> Option<&str> {
        self.get("input")
    }

    /// The conventional output directory, if set.
    pub fn outdir(&self) -> Option<&str> {
        self.get("outdir")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DockerSettings {
    pub enabled: bool,
    /// Extra arguments for the container run call (`docker.runOptions`).
    pub run_options: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Container image reference.
    pub container: Option<String>,
    /// Default CPU requirement for tasks that do not declare one.
    pub cpus: usize,
    /// Default memory requirement for tasks that do not declare one.
    pub memory: MemorySize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Local,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub kind: ExecutorKind,
    pub cpus: usize,
    pub memory: MemorySize,
    /// Optional per-task wall-clock limit.
    pub timeout: Option<Duration>,
}

/// An optional run artifact (timeline or report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSettings {
    pub enabled: bool,
    pub file: PathBuf,
}

/// Immutable, fully resolved run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub docker: DockerSettings,
    pub process: ProcessSettings,
    pub params: ParamNamespace,
    pub executor: ExecutorSettings,
    pub timeline: ArtifactSettings,
    pub report: ArtifactSettings,
    pub base_dir: PathBuf,
    pub launch_dir: PathBuf,
    tree: SettingsTree,
}

impl Settings {
    /// The resolved option tree, including unknown options.
    pub fn tree(&self) -> &SettingsTree {
        &self.tree
    }

    /// Looks up any resolved option, known or not.
    pub fn option(&self, section: &str, key: &str) -> Option<&ConfigValue> {
        self.tree.get(section).and_then(|entries| entries.get(key))
    }

    /// Converts the resolved tree back into raw blocks.
    ///
    /// Resolving the result with the same context yields equal settings.
    pub fn to_raw(&self) -> RawConfig {
        let mut raw = RawConfig::new();
        for (section, entries) in &self.tree {
            for (key, value) in entries {
                raw.set(section, key, value.clone());
            }
        }
        raw
    }
}

/// Resolves raw configuration blocks into [`Settings`].
///
/// Parameters are resolved first, in declaration order, so that a
/// parameter may reference an earlier one. Every other string option is
/// then interpolated against the finished namespace.
pub fn resolve(raw: &RawConfig, context: &ResolveContext) -> Result<Settings, ConfigError> {
    let merged = raw.merged();
    let mut bindings = context.bindings();
    let mut tree = SettingsTree::new();

    if let Some((_, entries)) = merged.iter().find(|(name, _)| name == "params") {
        let section = tree.entry("params".to_string()).or_default();
        for (key, value) in entries {
            let resolved = interpolate(&value.to_string(), &format!("params.{}", key), &bindings)?;
            bindings.insert_param(key.clone(), resolved.clone());
            section.insert(key.clone(), ConfigValue::Str(resolved));
        }
    }

    for (name, entries) in merged.iter().filter(|(name, _)| name != "params") {
        let section = tree.entry(name.clone()).or_default();
        for (key, value) in entries {
            let resolved = match value {
                ConfigValue::Str(text) if has_placeholders(text) => {
                    ConfigValue::Str(interpolate(text, &format!("{}.{}", name, key), &bindings)?)
                }
                other => other.clone(),
            };
            section.insert(key.clone(), resolved);
        }
    }

    let params = ParamNamespace(bindings.params().clone());
    let docker = resolve_docker(&mut tree)?;
    let process = resolve_process(&mut tree, docker.enabled)?;
    let executor = resolve_executor(&mut tree)?;
    let timeline = resolve_artifact(&mut tree, "timeline", context)?;
    let report = resolve_artifact(&mut tree, "report", context)?;

    debug!(
        "Resolved settings: {} params, executor {} ({} cpus, {}), docker {}",
        params.len(),
        executor.kind,
        executor.cpus,
        executor.memory,
        docker.enabled
    );

    Ok(Settings {
        docker,
        process,
        params,
        executor,
        timeline,
        report,
        base_dir: context.base_dir.clone(),
        launch_dir: context.launch_dir.clone(),
        tree,
    })
}

fn resolve_docker(tree: &mut SettingsTree) -> Result<DockerSettings, ConfigError> {
    let enabled = take_bool(tree, "docker", "enabled", false)?;
    let run_options = string_option(tree, "docker", "runOptions").filter(|s| !s.trim().is_empty());
    Ok(DockerSettings {
        enabled,
        run_options,
    })
}

fn resolve_process(tree: &mut SettingsTree, docker_enabled: bool) -> Result<ProcessSettings, ConfigError> {
    let container = string_option(tree, "process", "container").filter(|s| !s.trim().is_empty());
    if docker_enabled && container.is_none() {
        return Err(ConfigError::MissingValue("process.container".to_string()));
    }

    let cpus = take_positive(tree, "process", "cpus", 1)?;
    let memory = match string_option(tree, "process", "memory") {
        Some(text) => MemorySize::parse(&text)?,
        None => MemorySize::ZERO,
    };

    Ok(ProcessSettings {
        container,
        cpus,
        memory,
    })
}

fn resolve_executor(tree: &mut SettingsTree) -> Result<ExecutorSettings, ConfigError> {
    let name = string_option(tree, "executor", "name").unwrap_or_else(|| "local".to_string());
    if name != "local" {
        return Err(ConfigError::UnknownExecutor(name));
    }
    let kind = ExecutorKind::Local;
    store(tree, "executor", "name", ConfigValue::Str(name));

    let cpus = take_positive(tree, "executor", "cpus", num_cpus::get())?;

    let memory = match string_option(tree, "executor", "memory") {
        Some(text) => MemorySize::parse(&text)?,
        None => {
            let host = host_total_memory();
            store(tree, "executor", "memory", ConfigValue::Str(host.to_string()));
            host
        }
    };

    let timeout = string_option(tree, "executor", "timeout")
        .map(|text| {
            parse_duration(&text).map_err(|_| ConfigError::InvalidValue {
                key: "executor.timeout".to_string(),
                message: format!("'{}' is not a duration (expected e.g. 30s, 10m, 2h)", text),
            })
        })
        .transpose()?;

    Ok(ExecutorSettings {
        kind,
        cpus,
        memory,
        timeout,
    })
}

fn resolve_artifact(
    tree: &mut SettingsTree,
    section: &str,
    context: &ResolveContext,
) -> Result<ArtifactSettings, ConfigError> {
    let enabled = take_bool(tree, section, "enabled", false)?;
    let file = string_option(tree, section, "file").unwrap_or_else(|| format!("{}.html", section));
    let file = absolutize(&context.launch_dir, Path::new(&file));

    if enabled || tree.get(section).is_some_and(|s| s.contains_key("file")) {
        store(tree, section, "file", ConfigValue::Str(file.display().to_string()));
    }

    Ok(ArtifactSettings { enabled, file })
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn host_total_memory() -> MemorySize {
    let mut system = System::new();
    system.refresh_memory();
    MemorySize::from_bytes(system.total_memory())
}

fn store(tree: &mut SettingsTree, section: &str, key: &str, value: ConfigValue) {
    tree.entry(section.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

fn string_option(tree: &SettingsTree, section: &str, key: &str) -> Option<String> {
    tree.get(section)
        .and_then(|entries| entries.get(key))
        .map(|value| value.to_string())
}

fn take_bool(tree: &mut SettingsTree, section: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
    let value = match tree.get(section).and_then(|entries| entries.get(key)) {
        None => return Ok(default),
        Some(ConfigValue::Bool(b)) => *b,
        Some(ConfigValue::Str(s)) if s == "true" => true,
        Some(ConfigValue::Str(s)) if s == "false" => false,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.{}", section, key),
                message: format!("expected true or false, got '{}'", other),
            })
        }
    };
    store(tree, section, key, ConfigValue::Bool(value));
    Ok(value)
}

fn take_positive(tree: &mut SettingsTree, section: &str, key: &str, default: usize) -> Result<usize, ConfigError> {
    let invalid = |got: &ConfigValue| ConfigError::InvalidValue {
        key: format!("{}.{}", section, key),
        message: format!("expected a positive integer, got '{}'", got),
    };

    let value = match tree.get(section).and_then(|entries| entries.get(key)) {
        None => default,
        Some(found) => match found {
            ConfigValue::Int(i) if *i > 0 => *i as usize,
            ConfigValue::Str(s) => s
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid(found))?,
            _ => return Err(invalid(found)),
        },
    };
    store(tree, section, key, ConfigValue::Int(value as i64));
    Ok(value)
}
