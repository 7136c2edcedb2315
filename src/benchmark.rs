//! Wall-clock accounting of the optimisation phases.

use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Assembly,
    Solve,
    Sensitivity,
    Filter,
    Update,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assembly => "assembly",
            Self::Solve => "solve",
            Self::Sensitivity => "sensitivity",
            Self::Filter => "filter",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSummary {
    pub total_seconds: f64,
    pub percentage: f64,
    pub calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkSummary {
    pub total_time_seconds: f64,
    pub iterations: usize,
    pub phases: BTreeMap<String, PhaseSummary>,
    /// Largest resident set size seen at iteration boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_mb: Option<f64>,
}

/// Samples this process's resident memory.
struct MemorySampler {
    system: System,
    pid: Pid,
    peak_bytes: u64,
}

impl std::fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemorySampler(peak={} bytes)", self.peak_bytes)
    }
}

impl MemorySampler {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut sampler = Self {
            system: System::new(),
            pid,
            peak_bytes: 0,
        };
        sampler.sample();
        Some(sampler)
    }

    fn sample(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        if let Some(process) = self.system.process(self.pid) {
            self.peak_bytes = self.peak_bytes.max(process.memory());
        }
    }
}

/// Accumulates time per [`Phase`] between construction and `finalize`.
#[derive(Debug)]
pub struct BenchmarkTracker {
    started: Instant,
    total: Option<Duration>,
    phases: BTreeMap<Phase, (Duration, usize)>,
    iterations: usize,
    memory: Option<MemorySampler>,
}

impl Default for BenchmarkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: None,
            phases: BTreeMap::new(),
            iterations: 0,
            memory: None,
        }
    }

    /// Also sample resident memory at every iteration boundary.  Stays
    /// time-only on platforms where the current process cannot be found.
    pub fn with_memory_tracking() -> Self {
        Self {
            memory: MemorySampler::new(),
            ..Self::new()
        }
    }

    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        let slot = self.phases.entry(phase).or_insert((Duration::ZERO, 0));
        slot.0 += elapsed;
        slot.1 += 1;
    }

    pub fn end_iteration(&mut self) {
        self.iterations += 1;
        if let Some(memory) = self.memory.as_mut() {
            memory.sample();
        }
    }

    /// Stop the overall clock.  Later calls keep the first reading.
    pub fn finalize(&mut self) {
        if self.total.is_none() {
            self.total = Some(self.started.elapsed());
            if let Some(memory) = self.memory.as_mut() {
                memory.sample();
            }
        }
    }

    pub fn summary(&self) -> BenchmarkSummary {
        let total = self.total.unwrap_or_else(|| self.started.elapsed()).as_secs_f64();
        let phases = self
            .phases
            .iter()
            .map(|(phase, &(elapsed, calls))| {
                let secs = elapsed.as_secs_f64();
                let percentage = if total > 0.0 { 100.0 * secs / total } else { 0.0 };
                (
                    phase.as_str().to_string(),
                    PhaseSummary {
                        total_seconds: secs,
                        percentage,
                        calls,
                    },
                )
            })
            .collect();
        BenchmarkSummary {
            total_time_seconds: total,
            iterations: self.iterations,
            phases,
            peak_memory_mb: self
                .memory
                .as_ref()
                .filter(|m| m.peak_bytes > 0)
                .map(|m| m.peak_bytes as f64 / (1024.0 * 1024.0)),
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.summary())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
