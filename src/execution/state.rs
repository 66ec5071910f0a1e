//! Task State Table
//!
//! Per-task lifecycle state for one run. Only the scheduling thread
//! mutates the table; workers report back over a channel.
//!
//! ```text
//! Pending -> Admitted -> Running -> Succeeded | Failed | Cancelled
//!    |                                 ^
//!    +-- upstream failed / aborted ----+
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use super::admission::{Reservation, ResourceRequest};
use crate::config::{MemorySize, ProcessSettings};
use crate::workflow::{Task, TaskGraph};

/// Status of a task during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or resources
    Pending,
    /// Resources reserved, not yet handed to the adapter
    Admitted,
    /// Command is executing
    Running,
    /// Command exited with status zero
    Succeeded,
    /// Command failed, or an upstream task did
    Failed,
    /// Run aborted before the task finished
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Why a task ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    ExitCode { code: i32 },
    Timeout { millis: u64 },
    Spawn { message: String },
    /// The execution environment itself was unusable
    Environment { message: String },
    /// Never ran because a dependency failed
    Upstream { task_id: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode { code } => write!(f, "exit code {}", code),
            Self::Timeout { millis } => write!(f, "timed out after {} ms", millis),
            Self::Spawn { message } => write!(f, "failed to start: {}", message),
            Self::Environment { message } => write!(f, "environment unavailable: {}", message),
            Self::Upstream { task_id } => write!(f, "upstream task '{}' failed", task_id),
        }
    }
}

/// One task's row in the table.
#[derive(Debug)]
pub struct TaskEntry {
    pub task: Task,
    pub request: ResourceRequest,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
    dependencies: Vec<usize>,
    dependents: Vec<usize>,
    reservation: Option<Reservation>,
}

/// Lifecycle state of every task in a run, indexed by creation order.
#[derive(Debug)]
pub struct TaskTable {
    entries: Vec<TaskEntry>,
    index: HashMap<String, usize>,
}

impl TaskTable {
    /// Builds the table with every task `Pending`.
    ///
    /// Requirements left unset on a task take the `process` defaults.
    pub fn new(graph: &TaskGraph, defaults: &ProcessSettings) -> Self {
        let index: HashMap<String, usize> = graph
            .tasks
            .iter()
            .enumerate()
            .map(|(i, task)| (task.id.clone(), i))
            .collect();
        let dependents = graph.dependents();

        let entries = graph
            .tasks
            .iter()
            .zip(dependents)
            .map(|(task, dependents)| TaskEntry {
                request: ResourceRequest::new(task.cpus_or(defaults), task.memory_or(defaults)),
                status: TaskStatus::Pending,
                exit_code: None,
                failure: None,
                dependencies: task
                    .depends_on
                    .iter()
                    .filter_map(|dep| index.get(dep).copied())
                    .collect(),
                dependents,
                reservation: None,
                task: task.clone(),
            })
            .collect();

        Self { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&TaskEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, task_id: &str) -> Option<usize> {
        self.index.get(task_id).copied()
    }

    pub fn status(&self, index: usize) -> Option<TaskStatus> {
        self.entries.get(index).map(|entry| entry.status)
    }

    /// Pending tasks whose dependencies have all succeeded, in creation order.
    pub fn ready(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status == TaskStatus::Pending)
            .filter(|(_, entry)| {
                entry
                    .dependencies
                    .iter()
                    .all(|&dep| self.entries[dep].status == TaskStatus::Succeeded)
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Sum of requirements over tasks holding a reservation.
    pub fn reserved(&self) -> ResourceRequest {
        self.entries
            .iter()
            .filter_map(|e| e.reservation.as_ref())
            .fold(ResourceRequest::default(), |acc, r| {
                let request = r.request();
                ResourceRequest::new(
                    acc.cpus + request.cpus,
                    MemorySize::from_bytes(acc.memory.bytes() + request.memory.bytes()),
                )
            })
    }

    /// True once every task has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_terminal())
    }

    /// `Pending -> Admitted`, taking ownership of the reservation.
    ///
    /// Hands the reservation back if the task is not pending.
    pub fn mark_admitted(&mut self, index: usize, reservation: Reservation) -> Result<(), Reservation> {
        match self.entries.get_mut(index) {
            Some(entry) if entry.status == TaskStatus::Pending => {
                entry.status = TaskStatus::Admitted;
                entry.reservation = Some(reservation);
                Ok(())
            }
            _ => {
                warn!("Ignoring admission of task #{} that is not pending", index);
                Err(reservation)
            }
        }
    }

    /// `Admitted -> Running`.
    pub fn mark_running(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if entry.status == TaskStatus::Admitted => {
                entry.status = TaskStatus::Running;
                true
            }
            _ => {
                warn!("Ignoring start of task #{} that is not admitted", index);
                false
            }
        }
    }

    /// Moves a running task to a terminal status and returns its
    /// reservation for release. Yields `None` if the task is not
    /// running, so a reservation is never handed out twice.
    pub fn complete(
        &mut self,
        index: usize,
        status: TaskStatus,
        exit_code: Option<i32>,
        failure: Option<FailureReason>,
    ) -> Option<Reservation> {
        let entry = self.entries.get_mut(index)?;
        if entry.status != TaskStatus::Running || !status.is_terminal() {
            warn!(
                "Ignoring transition of task '{}' from {} to {}",
                entry.task.id, entry.status, status
            );
            return None;
        }

        entry.status = status;
        entry.exit_code = exit_code;
        entry.failure = failure;
        entry.reservation.take()
    }

    /// Fails every pending task that depends, directly or transitively,
    /// on `index`. Returns the newly failed tasks in visit order.
    pub fn cascade_failure(&mut self, index: usize) -> Vec<usize> {
        let Some(root) = self.entries.get(index).map(|e| e.task.id.clone()) else {
            return Vec::new();
        };

        let mut failed = Vec::new();
        let mut queue: VecDeque<usize> = self.entries[index].dependents.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            let entry = &mut self.entries[current];
            if entry.status != TaskStatus::Pending {
                continue;
            }
            entry.status = TaskStatus::Failed;
            entry.failure = Some(FailureReason::Upstream {
                task_id: root.clone(),
            });
            debug!("Task '{}' failed: upstream task '{}' failed", entry.task.id, root);
            failed.push(current);
            queue.extend(entry.dependents.iter().copied());
        }

        failed
    }

    /// Cancels every task that has not started. Reservations of admitted
    /// tasks are returned for release.
    pub fn cancel_unstarted(&mut self) -> (Vec<usize>, Vec<Reservation>) {
        let mut cancelled = Vec::new();
        let mut released = Vec::new();

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if matches!(entry.status, TaskStatus::Pending | TaskStatus::Admitted) {
                entry.status = TaskStatus::Cancelled;
                if let Some(reservation) = entry.reservation.take() {
                    released.push(reservation);
                }
                cancelled.push(i);
            }
        }

        (cancelled, released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::admission::{Admission, AdmissionController, ResourceBudget};

    fn defaults() -> ProcessSettings {
        ProcessSettings {
            container: None,
            cpus: 1,
            memory: MemorySize::ZERO,
        }
    }

    fn diamond() -> TaskTable {
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "true"),
            Task::new("b", "true").depends_on("a"),
            Task::new("c", "true").depends_on("b"),
            Task::new("d", "true"),
            Task::new("e", "true").depends_on("c").depends_on("d"),
        ]);
        TaskTable::new(&graph, &defaults())
    }

    fn start(table: &mut TaskTable, controller: &mut AdmissionController, index: usize) {
        let request = table.entries()[index].request;
        match controller.try_admit("t", request) {
            Admission::Admitted(reservation) => {
                assert!(table.mark_admitted(index, reservation).is_ok());
            }
            Admission::Deferred => panic!("deferred"),
        }
        assert!(table.mark_running(index));
    }

    fn controller() -> AdmissionController {
        AdmissionController::new(ResourceBudget::new(4, MemorySize::ZERO))
    }

    #[test]
    fn test_new_table_defaults() {
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "true").with_cpus(3)]);
        let table = TaskTable::new(&graph, &defaults());

        assert_eq!(table.len(), 1);
        assert_eq!(table.status(0), Some(TaskStatus::Pending));
        assert_eq!(table.entries()[0].request, ResourceRequest::new(3, MemorySize::ZERO));
        assert_eq!(table.index_of("a"), Some(0));
    }

    #[test]
    fn test_ready_follows_dependencies() {
        let mut table = diamond();
        let mut controller = controller();
        assert_eq!(table.ready(), vec![0, 3]);

        start(&mut table, &mut controller, 0);
        assert_eq!(table.ready(), vec![3]);

        let reservation = table.complete(0, TaskStatus::Succeeded, Some(0), None);
        controller.release(reservation.unwrap());
        assert_eq!(table.ready(), vec![1, 3]);
    }

    #[test]
    fn test_complete_returns_reservation_once() {
        let mut table = diamond();
        let mut controller = controller();
        start(&mut table, &mut controller, 0);

        assert!(table.complete(0, TaskStatus::Succeeded, Some(0), None).is_some());
        assert!(table.complete(0, TaskStatus::Failed, Some(1), None).is_none());
        assert_eq!(table.status(0), Some(TaskStatus::Succeeded));
    }

    #[test]
    fn test_complete_requires_running() {
        let mut table = diamond();
        assert!(table.complete(0, TaskStatus::Succeeded, Some(0), None).is_none());
        assert_eq!(table.status(0), Some(TaskStatus::Pending));
    }

    #[test]
    fn test_cascade_failure_is_transitive() {
        let mut table = diamond();
        let mut controller = controller();
        start(&mut table, &mut controller, 0);
        let _ = table.complete(
            0,
            TaskStatus::Failed,
            Some(1),
            Some(FailureReason::ExitCode { code: 1 }),
        );

        assert_eq!(table.cascade_failure(0), vec![1, 2, 4]);
        assert_eq!(table.status(3), Some(TaskStatus::Pending));
        assert_eq!(
            table.entries()[4].failure,
            Some(FailureReason::Upstream {
                task_id: "a".to_string()
            })
        );
        assert_eq!(table.ready(), vec![3]);
    }

    #[test]
    fn test_cancel_unstarted() {
        let mut table = diamond();
        let mut controller = controller();
        start(&mut table, &mut controller, 0);

        let request = table.entries()[3].request;
        if let Admission::Admitted(reservation) = controller.try_admit("d", request) {
            assert!(table.mark_admitted(3, reservation).is_ok());
        }

        let (cancelled, released) = table.cancel_unstarted();
        assert_eq!(cancelled, vec![1, 2, 3, 4]);
        assert_eq!(released.len(), 1);
        assert_eq!(table.status(0), Some(TaskStatus::Running));
        assert!(!table.is_finished());
        for reservation in released {
            controller.release(reservation);
        }
    }

    #[test]
    fn test_reserved_tracks_running_tasks() {
        let mut table = diamond();
        let mut controller = controller();
        start(&mut table, &mut controller, 0);
        start(&mut table, &mut controller, 3);

        assert_eq!(table.reserved(), controller.in_use());
        assert_eq!(table.count(TaskStatus::Running), 2);
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::ExitCode { code: 2 }.to_string(), "exit code 2");
        assert_eq!(
            FailureReason::Upstream {
                task_id: "prep".to_string()
            }
            .to_string(),
            "upstream task 'prep' failed"
        );
    }
}
