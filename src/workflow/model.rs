//! Task Graph Data Model
//!
//! The unit of work handed to the scheduler and the graph that orders it.
//!
//! # Example YAML Format
//!
//! ```yaml
//! tasks:
//!   - id: preprocess
//!     command: python scripts/01_data_preprocessing.py {params.input}
//!     cpus: 1
//!     memory: 2 GB
//!
//!   - id: model
//!     command: python scripts/03_statistical_modeling.py {params.outdir}
//!     cpus: 2
//!     depends_on: preprocess
//! ```

use std::collections::HashMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::config::{MemorySize, ProcessSettings};

/// A single unit of work.
///
/// Resource fields left unset fall back to the `process` defaults of the
/// run configuration, see [`Task::cpus_or`] and [`Task::memory_or`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique identifier; creation order in the graph is the scheduling tie-break
    pub id: String,

    /// Shell command, run with bash.
    /// `{params.NAME}` placeholders are replaced with resolved parameters
    pub command: String,

    /// CPU slots this task reserves while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<usize>,

    /// Memory this task reserves while running
    #[serde(
        default,
        deserialize_with = "optional_memory",
        serialize_with = "memory_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory: Option<MemorySize>,

    /// IDs of tasks that must succeed before this one may start
    #[serde(default, alias = "previous", deserialize_with = "single_or_vec")]
    pub depends_on: Vec<String>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Deserializes a memory quantity such as `"2 GB"`, or a plain byte count.
fn optional_memory<'de, D>(deserializer: D) -> Result<Option<MemorySize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(text) => MemorySize::parse(&text)
            .map(Some)
            .map_err(de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .map(|bytes| Some(MemorySize::from_bytes(bytes)))
            .ok_or_else(|| de::Error::custom("Expected a non-negative byte count")),
        _ => Err(de::Error::custom("Expected a memory quantity such as \"2 GB\"")),
    }
}

fn memory_string<S>(memory: &Option<MemorySize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match memory {
        Some(size) => serializer.serialize_str(&size.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Task {
    /// Creates a task with default resource requirements.
    ///
    /// # Example
    ///
    /// ```
    /// use nexrunner::workflow::Task;
    ///
    /// let task = Task::new("model", "python model.py")
    ///     .with_cpus(2)
    ///     .depends_on("preprocess");
    /// assert_eq!(task.depends_on, vec!["preprocess"]);
    /// ```
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            command: command.into().trim().to_string(),
            cpus: None,
            memory: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_memory(mut self, memory: MemorySize) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Adds a dependency on another task.
    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }

    /// CPU requirement, falling back to the configured default.
    pub fn cpus_or(&self, defaults: &ProcessSettings) -> usize {
        self.cpus.unwrap_or(defaults.cpus)
    }

    /// Memory requirement, falling back to the configured default.
    pub fn memory_or(&self, defaults: &ProcessSettings) -> MemorySize {
        self.memory.unwrap_or(defaults.memory)
    }
}

/// An ordered set of tasks with dependency edges.
///
/// The order of `tasks` is creation order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Adds a task, rejecting duplicate IDs.
    pub fn add_task(&mut self, task: Task) -> Result<(), String> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(format!("Task '{}' already exists", task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Creation index of each task ID.
    pub fn index_map(&self) -> HashMap<&str, usize> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.id.as_str(), index))
            .collect()
    }

    /// For each task (by creation index), the indices of tasks that
    /// depend on it directly. Unknown dependency IDs are ignored.
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let index = self.index_map();
        let mut dependents = vec![Vec::new(); self.tasks.len()];
        for (child, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                if let Some(&parent) = index.get(dep.as_str()) {
                    dependents[parent].push(child);
                }
            }
        }
        dependents
    }

    /// Tasks with no dependencies.
    pub fn root_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.depends_on.is_empty()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
