//! Task File Loader
//!
//! Loads task graph definitions from YAML and saves them back.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::TaskGraph;
use super::validator::{validate_graph, GraphError};

/// Parses and validates a task graph from YAML text.
pub fn parse_task_graph(yaml: &str) -> Result<TaskGraph, GraphError> {
    let graph: TaskGraph = serde_yaml::from_str(yaml)?;
    validate_graph(&graph)?;
    Ok(graph)
}

/// Loads a task graph from a YAML file.
///
/// # Example
///
/// ```no_run
/// use nexrunner::workflow::load_task_graph;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = load_task_graph("tasks.yaml")?;
///     println!("Loaded {} tasks", graph.len());
///     Ok(())
/// }
/// ```
pub fn load_task_graph(path: impl AsRef<Path>) -> Result<TaskGraph, GraphError> {
    let path = path.as_ref();
    info!("Loading task graph from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| GraphError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let graph = parse_task_graph(&content)?;
    info!(
        "Task graph loaded: {} tasks, {} without dependencies",
        graph.len(),
        graph.root_tasks().len()
    );
    for task in &graph.tasks {
        debug!("  {} <- [{}]", task.id, task.depends_on.join(", "));
    }
    Ok(graph)
}

/// Saves a task graph to a YAML file.
pub fn save_task_graph(graph: &TaskGraph, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(graph)?;
    fs::write(path, yaml).map_err(|e| GraphError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    info!("Task graph saved to: {}", path.display());
    Ok(())
}
