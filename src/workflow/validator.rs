//! Task Graph Validation
//!
//! Checks a task graph before anything is scheduled:
//! - Task field validation
//! - Reference integrity of `depends_on`
//! - Dependency graph validation (no cycles)
//! - Requirements that can never fit the executor budget

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};
use thiserror::Error;

use super::model::{Task, TaskGraph};
use crate::config::{MemorySize, ProcessSettings};

/// A single problem found in a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("Task graph has no tasks")]
    EmptyGraph,

    #[error("Task has empty or whitespace-only ID")]
    EmptyTaskId,

    #[error("Duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    #[error("Task '{0}' has no command specified")]
    EmptyCommand(String),

    #[error("Task '{task}' depends on unknown task '{reference}'")]
    UnknownDependency { task: String, reference: String },

    #[error("Task '{0}' requests zero cpus")]
    ZeroCpus(String),

    /// Tasks left over after topological elimination, in creation order.
    #[error("Task graph contains cyclic dependencies between: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("Task '{task}' requests {requested} but the executor only has {available}")]
    ExceedsBudget {
        task: String,
        requested: String,
        available: String,
    },
}

/// Failure to obtain a usable task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The task file could not be read.
    #[error("Failed to read task file '{path}': {message}")]
    Read { path: String, message: String },

    /// The task file is not valid YAML for a task graph.
    #[error("Failed to parse task file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The graph parsed but is not runnable.
    #[error("Invalid task graph:\n{}", format_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validates a single task's fields.
fn validate_task(task: &Task) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if task.id.trim().is_empty() {
        issues.push(ValidationIssue::EmptyTaskId);
        return issues;
    }

    if task.command.trim().is_empty() {
        issues.push(ValidationIssue::EmptyCommand(task.id.clone()));
    }

    if task.cpus == Some(0) {
        issues.push(ValidationIssue::ZeroCpus(task.id.clone()));
    }

    if task.depends_on.iter().any(|dep| dep == &task.id) {
        issues.push(ValidationIssue::CyclicDependency(vec![task.id.clone()]));
    }

    issues
}

/// Validates the structure of a task graph.
///
/// All problems are collected and returned together.
pub fn validate_graph(graph: &TaskGraph) -> Result<(), GraphError> {
    info!("Validating task graph ({} tasks)", graph.len());

    if graph.is_empty() {
        return Err(GraphError::Invalid(vec![ValidationIssue::EmptyGraph]));
    }

    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for task in &graph.tasks {
        issues.extend(validate_task(task));
        if !task.id.trim().is_empty() && !seen.insert(task.id.as_str()) {
            issues.push(ValidationIssue::DuplicateTaskId(task.id.clone()));
        }
    }

    for task in &graph.tasks {
        for dep in &task.depends_on {
            if !seen.contains(dep.as_str()) {
                issues.push(ValidationIssue::UnknownDependency {
                    task: task.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    // Cycle detection is only meaningful once references are sound
    if issues.is_empty() {
        if let Err(cycle) = topological_order(graph) {
            issues.push(ValidationIssue::CyclicDependency(cycle));
        }
    }

    if issues.is_empty() {
        debug!("Task graph is valid");
        Ok(())
    } else {
        Err(GraphError::Invalid(issues))
    }
}

/// Rejects tasks whose requirements exceed the whole executor budget.
///
/// Such a task could never be admitted, so the run would stall on it.
pub fn check_budget(
    graph: &TaskGraph,
    defaults: &ProcessSettings,
    cpus: usize,
    memory: MemorySize,
) -> Result<(), GraphError> {
    let issues: Vec<ValidationIssue> = graph
        .tasks
        .iter()
        .filter_map(|task| {
            let task_cpus = task.cpus_or(defaults);
            let task_memory = task.memory_or(defaults);
            if task_cpus > cpus {
                Some(ValidationIssue::ExceedsBudget {
                    task: task.id.clone(),
                    requested: format!("{} cpus", task_cpus),
                    available: format!("{} cpus", cpus),
                })
            } else if task_memory > memory {
                Some(ValidationIssue::ExceedsBudget {
                    task: task.id.clone(),
                    requested: task_memory.to_string(),
                    available: memory.to_string(),
                })
            } else {
                None
            }
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(GraphError::Invalid(issues))
    }
}

/// Orders task indices so every task follows its dependencies (Kahn's
/// algorithm). Ties are broken by creation order.
///
/// On a cycle, returns the IDs of the tasks that could not be ordered.
pub fn topological_order(graph: &TaskGraph) -> Result<Vec<usize>, Vec<String>> {
    let index: HashMap<&str, usize> = graph.index_map();
    let dependents = graph.dependents();

    let mut in_degree: Vec<usize> = graph
        .tasks
        .iter()
        .map(|task| {
            task.depends_on
                .iter()
                .filter(|dep| index.contains_key(dep.as_str()))
                .count()
        })
        .collect();

    let mut queue: VecDeque<usize> = (0..graph.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &child in &dependents[current] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() == graph.len() {
        Ok(order)
    } else {
        let ordered: HashSet<usize> = order.into_iter().collect();
        Err(graph
            .tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| !ordered.contains(i))
            .map(|(_, task)| task.id.clone())
            .collect())
    }
}
