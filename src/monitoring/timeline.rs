//! Execution Timeline
//!
//! Append-only log of task lifecycle events. Every event carries its own
//! UTC timestamp, so anything derived from the log (durations, Gantt
//! charts, reports) is a pure function of the recorded events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::UsageSummary;
use crate::config::MemorySize;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Resources reserved for the task
    Admitted,
    /// Command handed to the adapter
    Started,
    /// Command exited with status zero
    Succeeded,
    /// Command failed, or the task was failed because an upstream task did
    Failed,
    /// Run aborted before the task could finish
    Cancelled,
}

impl EventType {
    /// True for events that end a task's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub task_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Reserved CPU slots, on `Admitted` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<usize>,
    /// Reserved memory, on `Admitted` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySize>,
    /// Measured usage, on terminal events of tasks that ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
}

impl TimelineEvent {
    pub fn new(task_id: impl Into<String>, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            event_type,
            timestamp,
            exit_code: None,
            detail: None,
            cpus: None,
            memory: None,
            usage: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_reservation(mut self, cpus: usize, memory: MemorySize) -> Self {
        self.cpus = Some(cpus);
        self.memory = Some(memory);
        self
    }

    pub fn with_usage(mut self, usage: Option<UsageSummary>) -> Self {
        self.usage = usage;
        self
    }
}

/// Everything the log says about one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSpan {
    pub task_id: String,
    pub admitted: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: Option<EventType>,
    pub exit_code: Option<i32>,
    pub detail: Option<String>,
    pub cpus: Option<usize>,
    pub memory: Option<MemorySize>,
    pub usage: Option<UsageSummary>,
}

impl TaskSpan {
    /// Milliseconds between start and end, if the task ran.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started, self.ended) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
            _ => None,
        }
    }
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    /// Appends an event. Events are never modified or removed.
    pub fn record(&mut self, event: TimelineEvent) {
        self.events.push(event);
    }

    /// Records an event for a task at the current time.
    pub fn add_event(&mut self, task_id: impl Into<String>, event_type: EventType) {
        self.record(TimelineEvent::new(task_id, event_type, Utc::now()));
    }

    /// Marks the end of the run. Only the first call has an effect.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at.get_or_insert(at);
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End of the run: the finish mark, else the last event, else the start.
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.finished_at
            .or_else(|| self.events.iter().map(|e| e.timestamp).max())
            .unwrap_or(self.started_at)
            .max(self.started_at)
    }

    /// Total run span in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (self.ended_at() - self.started_at).num_milliseconds()
    }

    /// Folds the log into one span per task, in order of first appearance.
    pub fn spans(&self) -> Vec<TaskSpan> {
        let mut order: Vec<TaskSpan> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for event in &self.events {
            let slot = *index.entry(event.task_id.as_str()).or_insert_with(|| {
                order.push(TaskSpan {
                    task_id: event.task_id.clone(),
                    ..TaskSpan::default()
                });
                order.len() - 1
            });
            let span = &mut order[slot];

            match event.event_type {
                EventType::Admitted => {
                    span.admitted = Some(event.timestamp);
                    span.cpus = event.cpus.or(span.cpus);
                    span.memory = event.memory.or(span.memory);
                }
                EventType::Started => span.started = Some(event.timestamp),
                terminal => {
                    span.ended = Some(event.timestamp);
                    span.outcome = Some(terminal);
                    span.exit_code = event.exit_code;
                    span.detail = event.detail.clone();
                    span.usage = event.usage;
                }
            }
        }

        order
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each task that ran is shown as a bar indicating when it ran
    /// relative to the total run time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed_ms();
        if total_time <= 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut spans: Vec<TaskSpan> = self
            .spans()
            .into_iter()
            .filter(|span| span.started.is_some() && span.ended.is_some())
            .collect();
        spans.sort_by_key(|span| span.started);

        for span in spans {
            let (Some(started), Some(duration_ms)) = (span.started, span.duration_ms()) else {
                continue;
            };
            let offset = (started - self.started_at).num_milliseconds().max(0);
            let start_pos = (offset as f64 * scale) as usize;
            let width = (duration_ms as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            let marker = match span.outcome {
                Some(EventType::Succeeded) => "",
                Some(EventType::Cancelled) => " cancelled",
                _ => " failed",
            };
            output.push_str(&format!(
                "{:12} |{:50}| ({} ms){}\n",
                truncate(&span.task_id, 12),
                bar,
                duration_ms,
                marker
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns durations in milliseconds of tasks that ran.
    pub fn get_durations(&self) -> HashMap<String, i64> {
        self.spans()
            .into_iter()
            .filter_map(|span| span.duration_ms().map(|ms| (span.task_id, ms)))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a string to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn sample_timeline() -> ExecutionTimeline {
        let mut timeline = ExecutionTimeline::starting_at(t0());
        timeline.record(
            TimelineEvent::new("prep", EventType::Admitted, at(0))
                .with_reservation(2, MemorySize::parse("1 GB").unwrap()),
        );
        timeline.record(TimelineEvent::new("prep", EventType::Started, at(0)));
        timeline.record(
            TimelineEvent::new("prep", EventType::Succeeded, at(400)).with_exit_code(Some(0)),
        );
        timeline.record(TimelineEvent::new("model", EventType::Admitted, at(400)));
        timeline.record(TimelineEvent::new("model", EventType::Started, at(450)));
        timeline.record(
            TimelineEvent::new("model", EventType::Failed, at(1000))
                .with_exit_code(Some(1))
                .with_detail("exit code 1"),
        );
        timeline.record(
            TimelineEvent::new("plot", EventType::Failed, at(1000))
                .with_detail("upstream task 'model' failed"),
        );
        timeline.finish(at(1000));
        timeline
    }

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.get_events().is_empty());
        assert_eq!(timeline.elapsed_ms(), 0);
    }

    #[test]
    fn test_add_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Started);
        timeline.add_event("a", EventType::Succeeded);

        let events = timeline.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::Succeeded);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn test_spans() {
        let spans = sample_timeline().spans();
        assert_eq!(spans.len(), 3);

        assert_eq!(spans[0].task_id, "prep");
        assert_eq!(spans[0].cpus, Some(2));
        assert_eq!(spans[0].duration_ms(), Some(400));
        assert_eq!(spans[0].outcome, Some(EventType::Succeeded));

        assert_eq!(spans[1].exit_code, Some(1));
        assert_eq!(spans[2].started, None);
        assert_eq!(spans[2].duration_ms(), None);
        assert_eq!(spans[2].detail.as_deref(), Some("upstream task 'model' failed"));
    }

    #[test]
    fn test_get_durations() {
        let durations = sample_timeline().get_durations();
        assert_eq!(durations.get("prep"), Some(&400));
        assert_eq!(durations.get("model"), Some(&550));
        assert!(!durations.contains_key("plot"));
    }

    #[test]
    fn test_finish_is_sticky() {
        let mut timeline = sample_timeline();
        timeline.finish(at(5000));
        assert_eq!(timeline.elapsed_ms(), 1000);
    }

    #[test]
    fn test_ended_at_without_finish_uses_last_event() {
        let mut timeline = ExecutionTimeline::starting_at(t0());
        timeline.record(TimelineEvent::new("a", EventType::Started, at(10)));
        timeline.record(TimelineEvent::new("a", EventType::Succeeded, at(70)));
        assert_eq!(timeline.ended_at(), at(70));
    }

    #[test]
    fn test_gantt_chart_generation() {
        let chart = sample_timeline().gantt_chart();

        assert!(chart.contains("Execution Timeline"));
        assert!(chart.contains("prep"));
        assert!(chart.contains("(400 ms)"));
        assert!(chart.contains("failed"));
        assert!(!chart.contains("plot"));
        assert!(chart.contains("Total: 1000 ms"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let chart = ExecutionTimeline::starting_at(t0()).gantt_chart();
        assert!(chart.contains("Execution Timeline"));
        assert!(!chart.contains("Total"));
    }

    #[test]
    fn test_event_type_terminal() {
        assert!(!EventType::Admitted.is_terminal());
        assert!(!EventType::Started.is_terminal());
        assert!(EventType::Failed.is_terminal());
        assert!(EventType::Cancelled.is_terminal());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a_very_long_task", 8), "a_ver...");
    }
}
