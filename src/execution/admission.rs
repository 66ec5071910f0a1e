//! Resource Admission
//!
//! Gates dispatch on the executor's CPU and memory budget. The
//! controller is owned by the scheduling thread, so the check and the
//! decrement happen in one place and cannot race.

use std::fmt;
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::config::{ExecutorSettings, MemorySize};

/// Immutable resource budget of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceBudget {
    pub cpus: usize,
    pub memory: MemorySize,
}

impl ResourceBudget {
    pub fn new(cpus: usize, memory: MemorySize) -> Self {
        Self { cpus, memory }
    }

    pub fn from_settings(executor: &ExecutorSettings) -> Self {
        Self::new(executor.cpus, executor.memory)
    }

    /// True if `request` could ever be admitted against this budget.
    pub fn can_fit(&self, request: ResourceRequest) -> bool {
        request.cpus <= self.cpus && request.memory <= self.memory
    }
}

/// Resources one task needs while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResourceRequest {
    pub cpus: usize,
    pub memory: MemorySize,
}

impl ResourceRequest {
    pub fn new(cpus: usize, memory: MemorySize) -> Self {
        Self { cpus, memory }
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cpus, {}", self.cpus, self.memory)
    }
}

/// Proof that resources were taken from the budget.
///
/// Not `Clone`: handing it back to [`AdmissionController::release`]
/// consumes it, so the same resources cannot be restored twice.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be released when its task ends"]
pub struct Reservation {
    task_id: String,
    request: ResourceRequest,
}

impl Reservation {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn request(&self) -> ResourceRequest {
        self.request
    }
}

/// Result of an admission attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted(Reservation),
    /// Not enough free resources right now; try again after a release.
    Deferred,
}

/// Tracks free CPU slots and memory against a fixed budget.
#[derive(Debug)]
pub struct AdmissionController {
    budget: ResourceBudget,
    available_cpus: usize,
    available_memory: MemorySize,
    outstanding: usize,
    timeout: Option<Duration>,
}

impl AdmissionController {
    pub fn new(budget: ResourceBudget) -> Self {
        Self {
            budget,
            available_cpus: budget.cpus,
            available_memory: budget.memory,
            outstanding: 0,
            timeout: None,
        }
    }

    /// Sets the wall-clock limit applied to every admitted task.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn budget(&self) -> ResourceBudget {
        self.budget
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resources not currently reserved.
    pub fn available(&self) -> ResourceRequest {
        ResourceRequest::new(self.available_cpus, self.available_memory)
    }

    /// Resources held by outstanding reservations.
    pub fn in_use(&self) -> ResourceRequest {
        ResourceRequest::new(
            self.budget.cpus - self.available_cpus,
            MemorySize::from_bytes(self.budget.memory.bytes() - self.available_memory.bytes()),
        )
    }

    /// Number of reservations not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Reserves `request` if both CPU and memory are free, else defers.
    pub fn try_admit(&mut self, task_id: &str, request: ResourceRequest) -> Admission {
        if request.cpus > self.available_cpus || request.memory > self.available_memory {
            debug!(
                "Task '{}' deferred: needs {} but only {} available",
                task_id,
                request,
                self.available()
            );
            return Admission::Deferred;
        }

        self.available_cpus -= request.cpus;
        self.available_memory =
            MemorySize::from_bytes(self.available_memory.bytes() - request.memory.bytes());
        self.outstanding += 1;
        debug!(
            "Task '{}' admitted with {} (free: {})",
            task_id,
            request,
            self.available()
        );

        Admission::Admitted(Reservation {
            task_id: task_id.to_string(),
            request,
        })
    }

    /// Returns a reservation's resources to the pool.
    pub fn release(&mut self, reservation: Reservation) {
        let request = reservation.request;
        self.available_cpus = (self.available_cpus + request.cpus).min(self.budget.cpus);
        self.available_memory = MemorySize::from_bytes(
            (self.available_memory.bytes() + request.memory.bytes()).min(self.budget.memory.bytes()),
        );
        self.outstanding = self.outstanding.saturating_sub(1);
        debug!(
            "Task '{}' released {} (free: {})",
            reservation.task_id,
            request,
            self.available()
        );
    }
}
