//! Run Monitoring Module
//!
//! Records what happened during a run and turns it into artifacts.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Append-only task event log
//! - [`ReportEmitter`]: Timeline and report HTML rendering
//! - [`ProcessMonitor`]: CPU and memory sampling of a task's processes

pub mod report;
pub mod resource;
pub mod timeline;

pub use report::{escape_html, ArtifactPaths, RenderedReport, ReportEmitter, RunHeader};
pub use resource::{ProcessMonitor, ResourceSample, UsageSummary};
pub use timeline::{EventType, ExecutionTimeline, TaskSpan, TimelineEvent};
