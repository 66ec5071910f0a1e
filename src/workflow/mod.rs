//! Task Graph Module
//!
//! Data structures and utilities for defining, loading, and validating
//! the graph of tasks a run executes.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Task, TaskGraph)
//! - [`loader`]: YAML loading and saving
//! - [`validator`]: Validation rules and dependency checking

pub mod loader;
pub mod model;
pub mod validator;

pub use loader::{load_task_graph, parse_task_graph, save_task_graph};
pub use model::{Task, TaskGraph};
pub use validator::{check_budget, topological_order, validate_graph, GraphError, ValidationIssue};
