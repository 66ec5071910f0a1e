//! Run Execution Module
//!
//! Schedules tasks against the executor's resource budget and drives
//! them to completion.
//!
//! # Architecture
//!
//! - [`engine`]: Scheduling loop and run results
//! - [`admission`]: CPU and memory admission control
//! - [`state`]: Per-task lifecycle table
//! - [`step`]: Turning a task into an execution request

pub mod admission;
pub mod engine;
pub mod state;
pub mod step;

pub use admission::{Admission, AdmissionController, Reservation, ResourceBudget, ResourceRequest};
pub use engine::{Engine, EngineError, RunResult, TaskOutcome};
pub use state::{FailureReason, TaskStatus, TaskTable};
