mod types;

pub use types::{CaptureMetrics, CaptureOutcome, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use sysinfo::{Pid, ProcessesToUpdate, System};

const MAX_RECENT_CAPTURES: usize = 20;

/// Shared record of recent capture outcomes plus process CPU and memory.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_captures: VecDeque<CaptureMetrics>,
    capture_count: u64,
    distributed_count: u64,
    withheld_count: u64,
    failure_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: VecDeque::with_capacity(MAX_RECENT_CAPTURES),
                capture_count: 0,
                distributed_count: 0,
                withheld_count: 0,
                failure_count: 0,
                system,
                pid,
            })),
        }
    }

    pub fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.lock();

        state.capture_count += 1;
        match metrics.outcome {
            CaptureOutcome::Distributed => state.distributed_count += 1,
            CaptureOutcome::Withheld => state.withheld_count += 1,
            CaptureOutcome::Failed => state.failure_count += 1,
        }

        state.recent_captures.push_back(metrics);
        if state.recent_captures.len() > MAX_RECENT_CAPTURES {
            state.recent_captures.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut state = self.lock();
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = state
            .system
            .process(pid)
            .map(|process| SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            })
            .unwrap_or_default();

        MetricsSnapshot {
            system,
            recent_captures: state.recent_captures.iter().cloned().collect(),
            capture_count: state.capture_count,
            distributed_count: state.distributed_count,
            withheld_count: state.withheld_count,
            failure_count: state.failure_count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
