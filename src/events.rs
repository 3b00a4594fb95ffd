use serde::Serialize;
use tokio::sync::broadcast;

use crate::assistants::{AdviceResult, FocusResult, MemoryResult, TaskResult};
use crate::monitor::SessionState;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything the presentation layer hears about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    #[serde(rename_all = "camelCase")]
    MonitoringStarted { session_id: String },
    #[serde(rename_all = "camelCase")]
    MonitoringStopped { session_id: Option<String> },
    AppSwitch { app: String },
    Alert { message: String },
    StatusChange { status: SessionState },
    PermissionLost,
    FocusResult { payload: FocusResult },
    TaskResult { payload: TaskResult },
    AdviceResult { payload: AdviceResult },
    MemoryResult { payload: MemoryResult },
}

/// Fan-in point for scheduler and assistant emissions.
///
/// Each emitter sends from a single task, so events from one assistant keep
/// their order; nothing is promised across assistants.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine: the presentation layer may not be up yet.
        let _ = self.tx.send(event);
    }

    /// A receiver that falls more than the capacity behind gets
    /// `RecvError::Lagged` and loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
