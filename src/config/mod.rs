//! Run Configuration Module
//!
//! Parses the block-structured run configuration and resolves it into
//! immutable [`Settings`].
//!
//! # Structure
//!
//! - [`parser`]: Block syntax into raw, unresolved entries
//! - [`interpolate`]: `${...}` / `$name` substitution
//! - [`settings`]: Typed settings tree and resolution rules
//! - [`units`]: Memory and duration quantities

pub mod error;
pub mod interpolate;
pub mod parser;
pub mod settings;
pub mod units;

use std::env;
use std::path::{Path, PathBuf};

use log::info;

pub use error::ConfigError;
pub use parser::{load_config, parse_config, ConfigValue, RawConfig};
pub use settings::{
    resolve, ArtifactSettings, DockerSettings, ExecutorKind, ExecutorSettings, ParamNamespace,
    ProcessSettings, ResolveContext, Settings,
};
pub use units::MemorySize;

/// Loads and resolves a configuration file.
///
/// `baseDir` defaults to the directory containing the file and
/// `launchDir` to the current working directory.
pub fn load_settings(path: impl AsRef<Path>, base_dir: Option<PathBuf>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let read_error = |e: std::io::Error| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let launch_dir = env::current_dir().map_err(read_error)?;
    let base_dir = match base_dir {
        Some(dir) => dir,
        None => path
            .canonicalize()
            .map_err(read_error)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| launch_dir.clone()),
    };

    info!("Loading configuration: {}", path.display());
    let raw = load_config(path)?;
    resolve(&raw, &ResolveContext::new(base_dir, launch_dir))
}
