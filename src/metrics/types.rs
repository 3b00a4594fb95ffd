use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureOutcome {
    /// Handed to the assistants.
    Distributed,
    /// Captured while a delay window was active; indexed only.
    Withheld,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub timestamp: DateTime<Utc>,
    pub frame_number: u64,
    pub capture_ms: u64,
    pub frame_bytes: Option<usize>,
    pub outcome: CaptureOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub capture_count: u64,
    pub distributed_count: u64,
    pub withheld_count: u64,
    pub failure_count: u64,
}
