mod context;
mod session;

pub use session::{MonitoringSession, SessionState, StartDecision};

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::analysis::AnalysisBackend;
use crate::assistants::{default_assistants, AssistantFactory};
use crate::capture::{screen_frame_sources, CaptureSource, FrameIndexer, FrameSourceFactory};
use crate::events::{EventBus, MonitorEvent};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::notify::Notifier;
use crate::recovery::FailureState;
use crate::settings::MonitorConfig;
use crate::window::ActivationSource;

use context::{ControlMessage, MonitorContext};

/// Collaborators the monitor is built from. Nothing is looked up globally.
#[derive(Clone)]
pub struct MonitorDeps {
    pub activation: Arc<dyn ActivationSource>,
    pub capture: Arc<dyn CaptureSource>,
    pub frame_sources: FrameSourceFactory,
    pub assistants: AssistantFactory,
    pub notifier: Arc<dyn Notifier>,
    pub indexer: Option<Arc<dyn FrameIndexer>>,
}

impl MonitorDeps {
    /// Stock wiring: screen capture through `capture` and the four built-in
    /// assistants over `backend`.
    pub fn new(
        activation: Arc<dyn ActivationSource>,
        capture: Arc<dyn CaptureSource>,
        backend: Arc<dyn AnalysisBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            frame_sources: screen_frame_sources(Arc::clone(&capture)),
            assistants: default_assistants(backend),
            activation,
            capture,
            notifier,
            indexer: None,
        }
    }

    pub fn with_frame_sources(mut self, frame_sources: FrameSourceFactory) -> Self {
        self.frame_sources = frame_sources;
        self
    }

    pub fn with_assistants(mut self, assistants: AssistantFactory) -> Self {
        self.assistants = assistants;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn FrameIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerEvent {
    WillSleep,
    DidWake,
    ScreenLocked,
    ScreenUnlocked,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub has_capture_permission: bool,
    pub current_app: Option<String>,
    pub locked: bool,
    pub in_delay: bool,
    pub failures: FailureState,
}

/// Handle to the monitoring service. Cheap to clone; the service shuts down
/// when the last handle is dropped.
#[derive(Clone)]
pub struct Monitor {
    control: mpsc::UnboundedSender<ControlMessage>,
    status: watch::Receiver<MonitorStatus>,
    events: EventBus,
    metrics: MetricsCollector,
    capture: Arc<dyn CaptureSource>,
}

impl Monitor {
    /// Spawns the coordination task. Must be called inside a tokio runtime.
    pub fn new(deps: MonitorDeps, config: MonitorConfig) -> Self {
        let (control, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(MonitorStatus::default());
        let events = EventBus::with_capacity(config.event_buffer);
        let metrics = MetricsCollector::new();
        let capture = Arc::clone(&deps.capture);

        let context = MonitorContext::new(
            deps,
            config,
            control.downgrade(),
            status_tx,
            events.clone(),
            metrics.clone(),
        );
        tokio::spawn(context.run(rx));

        Self {
            control,
            status,
            events,
            metrics,
            capture,
        }
    }

    /// Resolves once the session is running, or with the reason it could
    /// not start. Succeeds immediately if already running.
    pub async fn start_monitoring(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::Start(Some(reply)))?;
        rx.await.context("monitor task exited before answering")?
    }

    /// Stops the session and waits until it has settled in `Stopped`.
    pub async fn stop_monitoring(&self) {
        if self.send(ControlMessage::Stop).is_err() {
            return;
        }
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|status| status.state == SessionState::Stopped)
            .await;
    }

    /// Returns whether monitoring is on afterwards.
    pub async fn toggle_monitoring(&self) -> Result<bool> {
        if self.is_monitoring() {
            self.stop_monitoring().await;
            Ok(false)
        } else {
            self.start_monitoring().await?;
            Ok(true)
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.status.borrow().state == SessionState::Running
    }

    pub fn session_state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Cached result of the last permission check.
    pub fn has_capture_permission(&self) -> bool {
        self.status.borrow().has_capture_permission
    }

    /// Queries the OS again and updates the cached value.
    pub async fn refresh_permission(&self) -> bool {
        let granted = self.capture.check_permission().await;
        let _ = self.send(ControlMessage::PermissionRefreshed(granted));
        granted
    }

    pub fn open_permission_settings(&self) -> Result<()> {
        self.capture
            .open_settings()
            .context("failed to open capture permission settings")
    }

    pub fn update_config(&self, config: MonitorConfig) -> Result<()> {
        config.validate()?;
        self.send(ControlMessage::UpdateConfig(Box::new(config)))
    }

    pub fn handle_power_event(&self, event: PowerEvent) {
        let _ = self.send(ControlMessage::Power(event));
    }

    /// Typed event stream. A subscriber that falls `event_buffer` events
    /// behind receives `RecvError::Lagged` and misses the oldest ones; the
    /// outcome of anything it missed, such as a lost permission, is still
    /// visible through `status()`.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn send(&self, message: ControlMessage) -> Result<()> {
        self.control
            .send(message)
            .map_err(|_| anyhow::anyhow!("monitor task is no longer running"))
    }
}
