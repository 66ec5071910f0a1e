//! Run Report Emitter
//!
//! Owns the run's event log and renders it into the timeline and report
//! HTML artifacts once the scheduler is done.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use serde::Serialize;

use super::timeline::{EventType, ExecutionTimeline, TaskSpan, TimelineEvent};
use crate::config::{ArtifactSettings, MemorySize};

/// Static facts about the run shown in both artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunHeader {
    pub run_name: String,
    /// Adapter name, `native` or `docker`
    pub executor: String,
    pub container: Option<String>,
    pub cpus: usize,
    pub memory: MemorySize,
}

/// Rendered artifact contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub timeline: String,
    pub report: String,
}

/// Paths of the artifacts actually written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub timeline: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

/// Collects task events during a run and renders them afterwards.
#[derive(Debug, Clone)]
pub struct ReportEmitter {
    header: RunHeader,
    timeline: ExecutionTimeline,
    fatal_error: Option<String>,
}

impl ReportEmitter {
    pub fn new(header: RunHeader) -> Self {
        Self::with_timeline(header, ExecutionTimeline::new())
    }

    pub fn with_timeline(header: RunHeader, timeline: ExecutionTimeline) -> Self {
        Self {
            header,
            timeline,
            fatal_error: None,
        }
    }

    /// Appends an event to the log.
    pub fn record(&mut self, event: TimelineEvent) {
        self.timeline.record(event);
    }

    /// Records the run-level error that aborted the run. The first one wins.
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        self.fatal_error.get_or_insert_with(|| message.into());
    }

    /// Closes the log at the given instant.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.timeline.finish(at);
    }

    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    /// Renders both artifacts from the recorded events.
    ///
    /// Output depends only on the header and the log, so repeated calls
    /// return identical text.
    pub fn render(&self) -> RenderedReport {
        let spans = self.timeline.spans();
        RenderedReport {
            timeline: render_timeline(&self.header, &self.timeline, &spans),
            report: render_report(&self.header, &self.timeline, &spans, self.fatal_error.as_deref()),
        }
    }

    /// Renders and writes the enabled artifacts.
    ///
    /// Write failures are logged and leave the corresponding path unset;
    /// they never fail the run.
    pub fn write(&self, timeline: &ArtifactSettings, report: &ArtifactSettings) -> ArtifactPaths {
        if !timeline.enabled && !report.enabled {
            return ArtifactPaths::default();
        }

        let rendered = self.render();
        ArtifactPaths {
            timeline: write_artifact("timeline", timeline, &rendered.timeline),
            report: write_artifact("report", report, &rendered.report),
        }
    }
}

fn write_artifact(kind: &str, settings: &ArtifactSettings, content: &str) -> Option<PathBuf> {
    if !settings.enabled {
        return None;
    }
    match write_atomic(&settings.file, content) {
        Ok(()) => {
            info!("Wrote {}: {}", kind, settings.file.display());
            Some(settings.file.clone())
        }
        Err(e) => {
            warn!("Failed to write {} {}: {}", kind, settings.file.display(), e);
            None
        }
    }
}

/// Writes `content` to a sibling temp file and renames it into place.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(format!(".{}.tmp", std::process::id()));
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        e
    })
}

/// Escapes text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:4px 8px;text-align:left}\
.track{position:relative;height:18px;background:#f4f4f4;width:800px}\
.bar{position:absolute;height:18px}\
.succeeded{background:#4caf50}.failed{background:#e53935}.cancelled{background:#9e9e9e}\
.running{background:#1e88e5}.error{color:#b71c1c}";

fn outcome_label(outcome: Option<EventType>) -> &'static str {
    match outcome {
        Some(EventType::Succeeded) => "succeeded",
        Some(EventType::Failed) => "failed",
        Some(EventType::Cancelled) => "cancelled",
        _ => "running",
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn page_start(title: &str, header: &RunHeader) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{} - {}</title>\n\
         <style>{}</style>\n</head>\n<body>\n<h1>{}</h1>\n",
        escape_html(title),
        escape_html(&header.run_name),
        STYLE,
        escape_html(title)
    )
}

fn render_timeline(header: &RunHeader, timeline: &ExecutionTimeline, spans: &[TaskSpan]) -> String {
    let mut html = page_start("Execution timeline", header);
    let total = timeline.elapsed_ms().max(1) as f64;

    let _ = writeln!(
        html,
        "<p>Run <b>{}</b> started {} and took {} ms.</p>",
        escape_html(&header.run_name),
        timestamp(timeline.started_at()),
        timeline.elapsed_ms()
    );
    html.push_str("<table>\n<tr><th>Task</th><th>Timeline</th><th>Duration</th></tr>\n");

    for span in spans {
        let bar = match (span.started, span.ended.or(Some(timeline.ended_at()))) {
            (Some(start), Some(end)) => {
                let offset = (start - timeline.started_at()).num_milliseconds().max(0) as f64;
                let width = (end - start).num_milliseconds().max(0) as f64;
                format!(
                    "<div class=\"bar {}\" style=\"left:{:.2}%;width:{:.2}%\"></div>",
                    outcome_label(span.outcome),
                    offset / total * 100.0,
                    (width / total * 100.0).max(0.2)
                )
            }
            _ => String::new(),
        };
        let duration = span
            .duration_ms()
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "-".to_string());

        let _ = writeln!(
            html,
            "<tr><td>{}</td><td><div class=\"track\">{}</div></td><td>{}</td></tr>",
            escape_html(&span.task_id),
            bar,
            duration
        );
    }
    html.push_str("</table>\n");

    let events = serde_json::to_string(timeline.get_events()).unwrap_or_else(|_| "[]".to_string());
    let _ = writeln!(
        html,
        "<script type=\"application/json\" id=\"events\">{}</script>",
        events.replace("</", "<\\/")
    );
    html.push_str("</body>\n</html>\n");
    html
}

fn render_report(
    header: &RunHeader,
    timeline: &ExecutionTimeline,
    spans: &[TaskSpan],
    fatal_error: Option<&str>,
) -> String {
    let mut html = page_start("Run report", header);

    let count = |outcome: EventType| spans.iter().filter(|s| s.outcome == Some(outcome)).count();
    let succeeded = count(EventType::Succeeded);
    let failed = count(EventType::Failed);
    let cancelled = count(EventType::Cancelled);
    let status = if fatal_error.is_some() {
        "aborted"
    } else if failed + cancelled == 0 {
        "succeeded"
    } else {
        "completed with failures"
    };

    html.push_str("<h2>Summary</h2>\n<table>\n");
    let rows = [
        ("Run", escape_html(&header.run_name)),
        ("Status", status.to_string()),
        ("Started", timestamp(timeline.started_at())),
        ("Finished", timestamp(timeline.ended_at())),
        ("Wall time", format!("{} ms", timeline.elapsed_ms())),
        ("Executor", escape_html(&header.executor)),
        (
            "Container",
            escape_html(header.container.as_deref().unwrap_or("-")),
        ),
        ("CPU budget", header.cpus.to_string()),
        ("Memory budget", header.memory.to_string()),
        (
            "Tasks",
            format!(
                "{} total, {} succeeded, {} failed, {} cancelled",
                spans.len(),
                succeeded,
                failed,
                cancelled
            ),
        ),
    ];
    for (label, value) in rows {
        let _ = writeln!(html, "<tr><th>{}</th><td>{}</td></tr>", label, value);
    }
    html.push_str("</table>\n");

    if let Some(error) = fatal_error {
        let _ = writeln!(html, "<p class=\"error\">Run aborted: {}</p>", escape_html(error));
    }

    html.push_str(
        "<h2>Tasks</h2>\n<table>\n<tr><th>Task</th><th>Status</th><th>Exit code</th>\
         <th>Duration</th><th>CPUs</th><th>Memory</th><th>Peak memory</th><th>Avg CPU</th>\
         <th>Detail</th></tr>\n",
    );
    for span in spans {
        let dash = || "-".to_string();
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&span.task_id),
            outcome_label(span.outcome),
            outcome_label(span.outcome),
            span.exit_code.map(|c| c.to_string()).unwrap_or_else(dash),
            span.duration_ms().map(|ms| format!("{} ms", ms)).unwrap_or_else(dash),
            span.cpus.map(|c| c.to_string()).unwrap_or_else(dash),
            span.memory.map(|m| m.to_string()).unwrap_or_else(dash),
            span.usage.map(|u| u.peak_memory.to_string()).unwrap_or_else(dash),
            span.usage
                .map(|u| format!("{:.1}%", u.average_cpu))
                .unwrap_or_else(dash),
            escape_html(span.detail.as_deref().unwrap_or("")),
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn header() -> RunHeader {
        RunHeader {
            run_name: "forest <fire>".to_string(),
            executor: "native".to_string(),
            container: None,
            cpus: 4,
            memory: MemorySize::parse("8 GB").unwrap(),
        }
    }

    fn emitter() -> ReportEmitter {
        let mut emitter = ReportEmitter::with_timeline(header(), ExecutionTimeline::starting_at(t0()));
        emitter.record(
            TimelineEvent::new("prep", EventType::Admitted, at(0))
                .with_reservation(1, MemorySize::parse("2 GB").unwrap()),
        );
        emitter.record(TimelineEvent::new("prep", EventType::Started, at(0)));
        emitter.record(
            TimelineEvent::new("prep", EventType::Succeeded, at(500)).with_exit_code(Some(0)),
        );
        emitter.record(TimelineEvent::new("fit", EventType::Started, at(500)));
        emitter.record(
            TimelineEvent::new("fit", EventType::Failed, at(1000))
                .with_exit_code(Some(1))
                .with_detail("</script><b>boom</b>"),
        );
        emitter.finish(at(1000));
        emitter
    }

    fn artifact(dir: &Path, name: &str, enabled: bool) -> ArtifactSettings {
        ArtifactSettings {
            enabled,
            file: dir.join("out").join(name),
        }
    }

    #[test]
    fn test_render_is_idempotent() {
        let emitter = emitter();
        assert_eq!(emitter.render(), emitter.render());
    }

    #[test]
    fn test_report_contents() {
        let report = emitter().render().report;

        assert!(report.contains("completed with failures"));
        assert!(report.contains("2 total, 1 succeeded, 1 failed, 0 cancelled"));
        assert!(report.contains("8 GB"));
        assert!(report.contains("2 GB"));
        assert!(report.contains("500 ms"));
        assert!(report.contains("forest &lt;fire&gt;"));
        assert!(!report.contains("<b>boom</b>"));
    }

    #[test]
    fn test_timeline_contents() {
        let timeline = emitter().render().timeline;

        assert!(timeline.contains("left:0.00%;width:50.00%"));
        assert!(timeline.contains("left:50.00%;width:50.00%"));
        assert!(timeline.contains("class=\"bar failed\""));
        assert!(timeline.contains("id=\"events\""));
        // Embedded JSON must not close the script element early
        assert!(!timeline.contains("\"</script>"));
    }

    #[test]
    fn test_fatal_error_is_reported() {
        let mut emitter = emitter();
        emitter.record_fatal("Container runtime unavailable: daemon down");
        emitter.record_fatal("second");

        let report = emitter.render().report;
        assert!(report.contains("aborted"));
        assert!(report.contains("daemon down"));
        assert!(!report.contains("second"));
    }

    #[test]
    fn test_write_only_enabled_artifacts() {
        let temp_dir = tempdir().unwrap();
        let timeline = artifact(temp_dir.path(), "timeline.html", false);
        let report = artifact(temp_dir.path(), "report.html", true);

        let paths = emitter().write(&timeline, &report);

        assert_eq!(paths.timeline, None);
        assert_eq!(paths.report.as_deref(), Some(report.file.as_path()));
        assert!(report.file.exists());
        assert!(!timeline.file.exists());

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let report = ArtifactSettings {
            enabled: true,
            file: blocker.join("report.html"),
        };
        let paths = emitter().write(&artifact(temp_dir.path(), "t.html", false), &report);
        assert_eq!(paths, ArtifactPaths::default());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
