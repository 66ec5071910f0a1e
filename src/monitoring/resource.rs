//! Resource Usage Monitoring
//!
//! Tracks CPU and memory usage of a running task's process tree for the
//! run report.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, System};

use crate::config::MemorySize;

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage summed over the process tree (0-100 per core)
    pub cpu_usage: f32,
    /// Resident memory summed over the process tree
    pub memory: MemorySize,
}

/// Aggregated usage of one task, as shown in the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub peak_memory: MemorySize,
    pub average_cpu: f32,
    pub samples: usize,
}

/// Monitors resource usage of a child process and its descendants.
///
/// # Example
///
/// ```rust,ignore
/// use nexrunner::monitoring::ProcessMonitor;
///
/// let child = std::process::Command::new("sleep").arg("1").spawn()?;
/// let mut monitor = ProcessMonitor::new(child.id());
/// monitor.sample();
/// println!("{}", monitor.get_summary());
/// ```
pub struct ProcessMonitor {
    system: System,
    root: Pid,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ProcessMonitor {
    /// Creates a monitor rooted at the given process ID.
    pub fn new(pid: u32) -> Self {
        Self {
            system: System::new(),
            root: Pid::from_u32(pid),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample.
    ///
    /// The first call performs CPU warmup (required for accurate readings).
    /// Subsequent calls are rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        let tree = self.process_tree();
        if tree.is_empty() {
            return;
        }

        let (cpu, memory) = tree
            .iter()
            .filter_map(|pid| self.system.process(*pid))
            .fold((0.0f32, 0u64), |(cpu, mem), process| {
                (cpu + process.cpu_usage(), mem + process.memory())
            });

        self.samples.push(ResourceSample {
            timestamp: now,
            cpu_usage: cpu,
            memory: MemorySize::from_bytes(memory),
        });
    }

    /// The root process and every live descendant.
    fn process_tree(&self) -> HashSet<Pid> {
        let mut tree = HashSet::new();
        if self.system.process(self.root).is_none() {
            return tree;
        }
        tree.insert(self.root);

        // Parents may be listed after their children, so iterate to a fixpoint
        loop {
            let before = tree.len();
            for (pid, process) in self.system.processes() {
                if let Some(parent) = process.parent() {
                    if tree.contains(&parent) {
                        tree.insert(*pid);
                    }
                }
            }
            if tree.len() == before {
                return tree;
            }
        }
    }

    /// Returns a human-readable summary of resource usage.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {}\n  Samples: {}",
            self.average_cpu(),
            self.peak_memory(),
            self.samples.len()
        )
    }

    /// Returns all collected samples.
    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory(&self) -> MemorySize {
        self.samples
            .iter()
            .map(|s| s.memory)
            .max()
            .unwrap_or(MemorySize::ZERO)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            peak_memory: self.peak_memory(),
            average_cpu: self.average_cpu(),
            samples: self.samples.len(),
        }
    }
}
