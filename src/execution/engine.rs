//! Run Engine
//!
//! The scheduling loop: admits ready tasks against the resource budget,
//! hands them to worker threads, and folds completion events back into
//! the task table. Only this loop mutates task state.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

use super::admission::{Admission, AdmissionController, ResourceBudget};
use super::state::{FailureReason, TaskStatus, TaskTable};
use super::step::{describe, ensure_output_directory, mount_points, prepare_request};
use crate::config::Settings;
use crate::environment::{
    adapter_for, CancelToken, ContainerAdapter, ExecutionError, ExecutionRequest, ExecutionResult,
};
use crate::monitoring::{
    ArtifactPaths, EventType, ExecutionTimeline, ReportEmitter, RunHeader, TimelineEvent,
};
use crate::workflow::{check_budget, validate_graph, GraphError, TaskGraph};

/// Interval for checking the abort flag while tasks run.
const ABORT_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Errors that stop a run before any task is dispatched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task '{task}' references undefined parameter 'params.{name}'")]
    UnknownParameter { task: String, name: String },

    #[error("Failed to create output directory '{path}': {message}")]
    OutputDirectory { path: String, message: String },
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub id: String,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
    pub duration_ms: Option<i64>,
}

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_name: String,
    pub dry_run: bool,
    /// Every task in creation order
    pub tasks: Vec<TaskOutcome>,
    /// Root cause of an aborted run
    pub fatal_error: Option<String>,
    pub artifacts: ArtifactPaths,
    #[serde(skip)]
    pub timeline: ExecutionTimeline,
}

impl RunResult {
    /// True iff every task succeeded and nothing aborted the run.
    pub fn is_success(&self) -> bool {
        self.fatal_error.is_none() && self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    /// IDs of tasks that ended `Failed`, including cascaded ones.
    pub fn failed_task_ids(&self) -> Vec<&str> {
        self.ids_with(TaskStatus::Failed)
    }

    pub fn cancelled_task_ids(&self) -> Vec<&str> {
        self.ids_with(TaskStatus::Cancelled)
    }

    pub fn task(&self, id: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn ids_with(&self, status: TaskStatus) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.as_str())
            .collect()
    }
}

type Completion = (usize, Result<ExecutionResult, ExecutionError>);

/// Local run engine.
///
/// # Example
///
/// ```rust,no_run
/// use nexrunner::config::load_settings;
/// use nexrunner::execution::Engine;
/// use nexrunner::workflow::load_task_graph;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = load_settings("nexflow.config", None)?;
///     let graph = load_task_graph("tasks.yaml")?;
///
///     let result = Engine::new(graph, settings).run()?;
///     println!("{} failed", result.failed_task_ids().len());
///     Ok(())
/// }
/// ```
pub struct Engine {
    graph: TaskGraph,
    settings: Settings,
    adapter: Arc<dyn ContainerAdapter>,
    run_name: String,
    dry_run: bool,
    abort_flag_path: Option<PathBuf>,
    cancel: CancelToken,
}

impl Engine {
    /// Creates an engine using the adapter the settings select.
    pub fn new(graph: TaskGraph, settings: Settings) -> Self {
        let adapter = adapter_for(&settings);
        Self::with_adapter(graph, settings, adapter)
    }

    pub fn with_adapter(
        graph: TaskGraph,
        settings: Settings,
        adapter: Arc<dyn ContainerAdapter>,
    ) -> Self {
        Self {
            graph,
            settings,
            adapter,
            run_name: format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            dry_run: false,
            abort_flag_path: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn set_run_name(&mut self, name: impl Into<String>) {
        self.run_name = name.into();
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// The run aborts as soon as a file appears at this path.
    pub fn set_abort_flag_path(&mut self, path: impl Into<PathBuf>) {
        self.abort_flag_path = Some(path.into());
    }

    /// Handle that aborts the run from another thread.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Executes the task graph.
    ///
    /// Task failures do not make this return `Err`; they are reported in
    /// the [`RunResult`]. `Err` means nothing was run.
    pub fn run(&mut self) -> Result<RunResult, EngineError> {
        let budget = ResourceBudget::from_settings(&self.settings.executor);
        validate_graph(&self.graph)?;
        check_budget(&self.graph, &self.settings.process, budget.cpus, budget.memory)?;

        let mut table = TaskTable::new(&self.graph, &self.settings.process);
        let requests = self.prepare_requests(&table)?;

        if !self.dry_run {
            ensure_output_directory(&self.settings).map_err(|e| EngineError::OutputDirectory {
                path: self.settings.params.outdir().unwrap_or_default().to_string(),
                message: e.to_string(),
            })?;
        }

        info!(
            "Starting run '{}' ({} tasks, {} cpus, {}, executor: {}, dry run: {})",
            self.run_name,
            table.len(),
            budget.cpus,
            budget.memory,
            self.adapter.name(),
            self.dry_run
        );

        let mut scheduler = Scheduler {
            table: &mut table,
            controller: AdmissionController::new(budget).with_timeout(self.settings.executor.timeout),
            emitter: ReportEmitter::new(self.header(budget)),
            adapter: Arc::clone(&self.adapter),
            cancel: self.cancel.clone(),
            abort_flag_path: self.abort_flag_path.as_deref(),
            dry_run: self.dry_run,
            running: 0,
            aborting: false,
            fatal_error: None,
        };

        if !self.dry_run {
            if let Err(e) = self.adapter.probe() {
                error!("{}", e);
                scheduler.abort(e.to_string());
            }
        }

        scheduler.drive(&requests);
        let Scheduler {
            emitter: mut emitter,
            fatal_error,
            ..
        } = scheduler;

        emitter.finish(Utc::now());
        let artifacts = emitter.write(&self.settings.timeline, &self.settings.report);
        let timeline = emitter.timeline().clone();
        let spans = timeline.spans();

        let tasks = table
            .entries()
            .iter()
            .map(|entry| TaskOutcome {
                id: entry.task.id.clone(),
                status: entry.status,
                exit_code: entry.exit_code,
                failure: entry.failure.clone(),
                duration_ms: spans
                    .iter()
                    .find(|s| s.task_id == entry.task.id)
                    .and_then(|s| s.duration_ms()),
            })
            .collect();

        Ok(RunResult {
            run_name: self.run_name.clone(),
            dry_run: self.dry_run,
            tasks,
            fatal_error,
            artifacts,
            timeline,
        })
    }

    /// Renders every command up front so a bad placeholder fails the run
    /// before anything executes.
    fn prepare_requests(&self, table: &TaskTable) -> Result<Vec<ExecutionRequest>, EngineError> {
        let mounts = mount_points(&self.settings);
        table
            .entries()
            .iter()
            .map(|entry| {
                prepare_request(&entry.task, entry.request, &self.settings, &mounts).map_err(|name| {
                    EngineError::UnknownParameter {
                        task: entry.task.id.clone(),
                        name,
                    }
                })
            })
            .collect()
    }

    fn header(&self, budget: ResourceBudget) -> RunHeader {
        RunHeader {
            run_name: self.run_name.clone(),
            executor: self.adapter.name().to_string(),
            container: self
                .settings
                .process
                .container
                .clone()
                .filter(|_| self.settings.docker.enabled),
            cpus: budget.cpus,
            memory: budget.memory,
        }
    }
}

/// Mutable state of one scheduling loop.
struct Scheduler<'a> {
    table: &'a mut TaskTable,
    controller: AdmissionController,
    emitter: ReportEmitter,
    adapter: Arc<dyn ContainerAdapter>,
    cancel: CancelToken,
    abort_flag_path: Option<&'a Path>,
    dry_run: bool,
    running: usize,
    aborting: bool,
    fatal_error: Option<String>,
}

impl Scheduler<'_> {
    /// Runs until every task is terminal.
    fn drive(&mut self, requests: &[ExecutionRequest]) {
        let (tx, rx): (Sender<Completion>, Receiver<Completion>) = channel();

        loop {
            self.check_abort();

            let dispatched = if self.aborting {
                0
            } else {
                self.dispatch_ready(requests, &tx)
            };

            if self.running == 0 {
                if dispatched > 0 {
                    // Dry run completes inline and may unblock more tasks
                    continue;
                }
                break;
            }

            match rx.recv_timeout(ABORT_CHECK_INTERVAL) {
                Ok((index, result)) => self.handle_completion(index, result),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    error!("Worker channel closed with {} tasks running", self.running);
                    break;
                }
            }
        }

        // Anything still pending could never become ready
        let (stranded, released) = self.table.cancel_unstarted();
        for reservation in released {
            self.controller.release(reservation);
        }
        for index in stranded {
            warn!("Task '{}' was never scheduled", self.task_id(index));
            self.record(index, EventType::Cancelled, |e| e.with_detail("not scheduled"));
        }
    }

    /// Admits and starts every ready task that fits, in creation order.
    /// A task that does not fit is skipped so smaller ones behind it can
    /// still start.
    fn dispatch_ready(&mut self, requests: &[ExecutionRequest], tx: &Sender<Completion>) -> usize {
        let mut dispatched = 0;

        for index in self.table.ready() {
            let request = self.table.entries()[index].request;
            let task_id = self.task_id(index).to_string();
            let reservation = match self.controller.try_admit(&task_id, request) {
                Admission::Admitted(reservation) => reservation,
                Admission::Deferred => continue,
            };
            if let Err(reservation) = self.table.mark_admitted(index, reservation) {
                self.controller.release(reservation);
                continue;
            }
            self.record(index, EventType::Admitted, |e| {
                e.with_reservation(request.cpus, request.memory)
            });

            if !self.table.mark_running(index) {
                continue;
            }
            info!("Starting task: {}", task_id);
            self.record(index, EventType::Started, |e| e);
            dispatched += 1;

            if self.dry_run {
                println!();
                println!("{}", describe(&requests[index], self.adapter.name()));
                self.handle_completion(index, Ok(ExecutionResult::default()));
                continue;
            }

            let tx = tx.clone();
            let adapter = Arc::clone(&self.adapter);
            let mut request = requests[index].clone();
            request.timeout = self.controller.timeout();
            let cancel = self.cancel.clone();
            thread::spawn(move || {
                let result = adapter.execute(&request, &cancel);
                if let Err(e) = tx.send((index, result)) {
                    error!("Failed to send completion signal: {}", e);
                }
            });
            self.running += 1;
        }

        dispatched
    }

    fn handle_completion(&mut self, index: usize, result: Result<ExecutionResult, ExecutionError>) {
        if !self.dry_run {
            self.running = self.running.saturating_sub(1);
        }
        let task_id = self.task_id(index).to_string();

        if let Err(e) = &result {
            if e.is_fatal() {
                error!("Task '{}': {}", task_id, e);
                self.abort(e.to_string());
            }
        }

        let (status, exit_code, failure, usage) = match result {
            Ok(done) => {
                info!("Task '{}' completed successfully", task_id);
                if !done.stdout.trim().is_empty() {
                    debug!("Task '{}' output:\n{}", task_id, done.stdout);
                }
                (TaskStatus::Succeeded, Some(done.exit_code), None, done.usage)
            }
            Err(ExecutionError::NonZeroExit {
                exit_code,
                stderr,
                usage,
            }) => {
                error!("Task '{}' failed with exit code: {}", task_id, exit_code);
                if !stderr.trim().is_empty() {
                    error!("stderr:\n{}", stderr);
                }
                (
                    TaskStatus::Failed,
                    Some(exit_code),
                    Some(FailureReason::ExitCode { code: exit_code }),
                    usage,
                )
            }
            Err(ExecutionError::Timeout(limit)) => {
                error!("Task '{}' timed out after {:?}", task_id, limit);
                let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                (TaskStatus::Failed, None, Some(FailureReason::Timeout { millis }), None)
            }
            Err(ExecutionError::Spawn(message)) => {
                error!("Task '{}' could not start: {}", task_id, message);
                (TaskStatus::Failed, None, Some(FailureReason::Spawn { message }), None)
            }
            Err(ExecutionError::Cancelled) => {
                warn!("Task '{}' cancelled", task_id);
                (TaskStatus::Cancelled, None, None, None)
            }
            Err(ExecutionError::ContainerUnavailable(message)) => (
                TaskStatus::Failed,
                None,
                Some(FailureReason::Environment { message }),
                None,
            ),
        };

        let detail = failure.as_ref().map(ToString::to_string);
        match self.table.complete(index, status, exit_code, failure) {
            Some(reservation) => self.controller.release(reservation),
            None => return,
        }
        self.record(index, event_for(status), |e| {
            let e = e.with_exit_code(exit_code).with_usage(usage);
            match detail {
                Some(detail) => e.with_detail(detail),
                None => e,
            }
        });

        if status == TaskStatus::Failed {
            for dependent in self.table.cascade_failure(index) {
                warn!(
                    "Task '{}' will not run: upstream task '{}' failed",
                    self.task_id(dependent),
                    task_id
                );
                let detail = format!("upstream task '{}' failed", task_id);
                self.record(dependent, EventType::Failed, |e| e.with_detail(detail));
            }
        }
    }

    /// Starts aborting: signal running tasks and cancel everything else.
    fn abort(&mut self, reason: String) {
        if self.fatal_error.is_none() {
            self.emitter.record_fatal(reason.clone());
            self.fatal_error = Some(reason);
        }
        if self.aborting {
            return;
        }
        self.aborting = true;
        self.cancel.cancel();

        let (cancelled, released) = self.table.cancel_unstarted();
        for reservation in released {
            self.controller.release(reservation);
        }
        for index in cancelled {
            self.record(index, EventType::Cancelled, |e| e.with_detail("run aborted"));
        }
    }

    fn check_abort(&mut self) {
        if self.aborting {
            return;
        }
        if self.cancel.is_cancelled() {
            warn!("Run cancelled");
            self.abort("Run cancelled".to_string());
        } else if let Some(path) = self.abort_flag_path.filter(|p| p.exists()) {
            warn!("Abort flag found: {}", path.display());
            self.abort(format!("Abort flag found: {}", path.display()));
        }
    }

    fn task_id(&self, index: usize) -> &str {
        self.table
            .get(index)
            .map(|e| e.task.id.as_str())
            .unwrap_or("?")
    }

    fn record(
        &mut self,
        index: usize,
        event_type: EventType,
        build: impl FnOnce(TimelineEvent) -> TimelineEvent,
    ) {
        let event = TimelineEvent::new(self.task_id(index), event_type, Utc::now());
        self.emitter.record(build(event));
    }
}

fn event_for(status: TaskStatus) -> EventType {
    match status {
        TaskStatus::Succeeded => EventType::Succeeded,
        TaskStatus::Cancelled => EventType::Cancelled,
        _ => EventType::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve, MemorySize, ResolveContext};
    use crate::workflow::Task;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Adapter that records calls and fails tasks whose command is `fail`.
    struct ScriptedAdapter {
        calls: Mutex<Vec<String>>,
        timeouts: Mutex<Vec<Option<Duration>>>,
    }

    impl ScriptedAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                timeouts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ContainerAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        fn execute(
            &self,
            request: &ExecutionRequest,
            _cancel: &CancelToken,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.lock().unwrap().push(request.task_id.clone());
            self.timeouts.lock().unwrap().push(request.timeout);
            match request.command.as_str() {
                "fail" => Err(ExecutionError::NonZeroExit {
                    exit_code: 1,
                    stderr: "boom".to_string(),
                    usage: None,
                }),
                "down" => Err(ExecutionError::ContainerUnavailable("daemon down".to_string())),
                _ => Ok(ExecutionResult::default()),
            }
        }
    }

    fn settings(dir: &Path, extra: &str) -> Settings {
        let text = format!(
            "executor {{ cpus = 4\n memory = '8 GB' }}\nparams {{ outdir = \"$baseDir/out\" }}\n{}",
            extra
        );
        resolve(&parse_config(&text).unwrap(), &ResolveContext::new(dir, dir)).unwrap()
    }

    fn engine(graph: TaskGraph, dir: &Path, adapter: Arc<ScriptedAdapter>) -> Engine {
        let mut engine = Engine::with_adapter(graph, settings(dir, ""), adapter);
        engine.set_run_name("test");
        engine
    }

    #[test]
    fn test_run_all_succeed() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "ok"),
            Task::new("b", "ok").depends_on("a"),
        ]);

        let result = engine(graph, temp_dir.path(), adapter.clone()).run().unwrap();

        assert!(result.is_success());
        assert_eq!(adapter.calls(), vec!["a", "b"]);
        assert!(temp_dir.path().join("out").is_dir());
        assert_eq!(result.artifacts, ArtifactPaths::default());
    }

    #[test]
    fn test_failure_cascades_but_siblings_finish() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "fail"),
            Task::new("b", "ok").depends_on("a"),
            Task::new("c", "ok").depends_on("b"),
            Task::new("sibling", "ok"),
        ]);

        let result = engine(graph, temp_dir.path(), adapter.clone()).run().unwrap();

        assert!(!result.is_success());
        assert_eq!(result.fatal_error, None);
        assert_eq!(result.failed_task_ids(), vec!["a", "b", "c"]);
        assert_eq!(result.task("a").unwrap().exit_code, Some(1));
        assert_eq!(result.task("sibling").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(
            result.task("c").unwrap().failure,
            Some(FailureReason::Upstream {
                task_id: "a".to_string()
            })
        );

        let calls = adapter.calls();
        assert!(!calls.contains(&"b".to_string()));
        assert!(!calls.contains(&"c".to_string()));
    }

    #[test]
    fn test_container_unavailable_aborts_run() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "down").with_cpus(4),
            Task::new("b", "ok"),
        ]);

        let result = engine(graph, temp_dir.path(), adapter).run().unwrap();

        assert!(result.fatal_error.unwrap().contains("daemon down"));
        assert_eq!(result.tasks[0].status, TaskStatus::Failed);
        assert_eq!(result.tasks[1].status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_admission_timeout_reaches_adapter() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "ok")]);
        let settings = settings(temp_dir.path(), "executor { timeout = '90s' }");

        let result = Engine::with_adapter(graph, settings, adapter.clone())
            .run()
            .unwrap();

        assert!(result.is_success());
        assert_eq!(
            *adapter.timeouts.lock().unwrap(),
            vec![Some(Duration::from_secs(90))]
        );
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "fail"),
            Task::new("b", "ok").depends_on("a"),
        ]);

        let mut engine = engine(graph, temp_dir.path(), adapter.clone());
        engine.set_dry_run(true);
        let result = engine.run().unwrap();

        assert!(result.is_success());
        assert!(result.dry_run);
        assert!(adapter.calls().is_empty());
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "ok")]);

        let mut engine = engine(graph, temp_dir.path(), adapter.clone());
        engine.cancel_handle().cancel();
        let result = engine.run().unwrap();

        assert_eq!(result.cancelled_task_ids(), vec!["a"]);
        assert_eq!(result.fatal_error.as_deref(), Some("Run cancelled"));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_unknown_parameter_rejected_before_run() {
        let temp_dir = tempdir().unwrap();
        let adapter = ScriptedAdapter::new();
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "echo {params.nope}")]);

        let err = engine(graph, temp_dir.path(), adapter.clone()).run().unwrap_err();
        assert!(matches!(err, EngineError::UnknownParameter { ref name, .. } if name == "nope"));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_task_over_budget_rejected() {
        let temp_dir = tempdir().unwrap();
        let graph = TaskGraph::from_tasks(vec![
            Task::new("a", "ok").with_memory(MemorySize::parse("16 GB").unwrap())
        ]);

        let err = engine(graph, temp_dir.path(), ScriptedAdapter::new()).run().unwrap_err();
        assert!(matches!(err, EngineError::Graph(GraphError::Invalid(_))));
    }

    #[test]
    fn test_reports_written_on_partial_failure() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();
        let settings = settings(
            dir,
            "timeline { enabled = true\n file = \"${params.outdir}/timeline.html\" }\n\
             report { enabled = true\n file = \"${params.outdir}/report.html\" }",
        );
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "fail"), Task::new("b", "ok")]);

        let result = Engine::with_adapter(graph, settings, ScriptedAdapter::new())
            .run()
            .unwrap();

        let report = result.artifacts.report.unwrap();
        assert_eq!(report, dir.join("out/report.html"));
        assert!(std::fs::read_to_string(report).unwrap().contains("completed with failures"));
        assert!(result.artifacts.timeline.unwrap().exists());
    }

    #[test]
    fn test_run_result_serializes() {
        let temp_dir = tempdir().unwrap();
        let graph = TaskGraph::from_tasks(vec![Task::new("a", "fail")]);
        let result = engine(graph, temp_dir.path(), ScriptedAdapter::new()).run().unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tasks"][0]["status"], "failed");
        assert_eq!(json["tasks"][0]["failure"]["kind"], "exit_code");
        assert_eq!(json["tasks"][0]["failure"]["code"], 1);
    }
}
