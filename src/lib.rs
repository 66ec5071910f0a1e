//! nexrunner - Local Workflow Executor
//!
//! Runs a graph of shell tasks on one machine under a Nextflow-style run
//! configuration: parameters and settings come from the configuration
//! file, tasks are admitted against a CPU and memory budget, executed
//! natively or inside a Docker container, and summarised as timeline and
//! report HTML.
//!
//! # Architecture
//!
//! - [`config`]: Configuration parsing, interpolation and resolution
//! - [`workflow`]: Task graph data structures, loading and validation
//! - [`execution`]: Admission control and the scheduling engine
//! - [`environment`]: Native and Docker command execution
//! - [`monitoring`]: Event timeline, resource sampling and reports
//!
//! # Example
//!
//! ```rust,no_run
//! use nexrunner::{load_settings, load_task_graph, Engine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = load_settings("nexflow.config", None)?;
//!     let graph = load_task_graph("tasks.yaml")?;
//!
//!     let mut engine = Engine::new(graph, settings);
//!     let result = engine.run()?;
//!
//!     for task in &result.tasks {
//!         println!("{}: {}", task.id, task.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod environment;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_settings, ConfigError, Settings};
pub use execution::{Engine, EngineError, RunResult, TaskStatus};
pub use workflow::{load_task_graph, Task, TaskGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "nexrunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "nexrunner");
    }

    #[test]
    fn test_module_exports_task() {
        let task = Task::new("prep", "echo prep");
        assert_eq!(task.id, "prep");
        assert_eq!(task.command, "echo prep");
    }

    #[test]
    fn test_module_exports_graph() {
        let graph = TaskGraph::new();
        assert!(graph.is_empty());
    }
}
