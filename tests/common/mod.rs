#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use lookout::assistants::AssistantFactory;
use lookout::capture::{FrameIndexer, FrameSourceFactory};
use lookout::events::MonitorEvent;
use lookout::settings::AssistantSettings;
use lookout::{
    ActivationSource, Assistant, AssistantKind, AssistantResult, CaptureError, CaptureRequest,
    CaptureSource, CapturedFrame, ForegroundWindow, FrameSource, Monitor, MonitorConfig,
    MonitorDeps, Notifier, RawCapture,
};

/// Foreground app the test sets by hand.
pub struct FakeActivation {
    current: Mutex<Option<ForegroundWindow>>,
}

impl FakeActivation {
    pub fn new(app: &str) -> Arc<Self> {
        let activation = Arc::new(Self {
            current: Mutex::new(None),
        });
        activation.set(app);
        activation
    }

    pub fn set(&self, app: &str) {
        *self.current.lock().unwrap() = Some(ForegroundWindow {
            app_name: app.to_string(),
            window_title: Some(format!("{app} main window")),
        });
    }
}

#[async_trait]
impl ActivationSource for FakeActivation {
    async fn frontmost(&self) -> Result<Option<ForegroundWindow>> {
        Ok(self.current.lock().unwrap().clone())
    }
}

/// OS capture adapter; only its permission side is exercised here.
pub struct FakeCapture {
    granted: AtomicBool,
    checks: AtomicUsize,
    settings_opened: AtomicUsize,
    check_delay: Mutex<Duration>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
            settings_opened: AtomicUsize::new(0),
            check_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock().unwrap() = delay;
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for FakeCapture {
    async fn capture_focused_window(&self) -> Result<RawCapture, CaptureError> {
        if self.granted.load(Ordering::SeqCst) {
            Err(CaptureError::NoFocusedWindow)
        } else {
            Err(CaptureError::PermissionDenied)
        }
    }

    async fn check_permission(&self) -> bool {
        let delay = *self.check_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.granted.load(Ordering::SeqCst)
    }

    fn open_settings(&self) -> Result<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts frame-source builds and captures; can be told to fail.
pub struct FakeFrames {
    builds: AtomicUsize,
    captures: AtomicUsize,
    fail: AtomicBool,
    capture_delay: Mutex<Duration>,
}

impl FakeFrames {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            capture_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn factory(self: &Arc<Self>) -> FrameSourceFactory {
        let frames = Arc::clone(self);
        Arc::new(move |_config: &MonitorConfig| {
            frames.builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(FakeSource {
                frames: Arc::clone(&frames),
            }) as Arc<dyn FrameSource>
        })
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

struct FakeSource {
    frames: Arc<FakeFrames>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn capture(&self, request: CaptureRequest) -> Result<CapturedFrame, CaptureError> {
        self.frames.captures.fetch_add(1, Ordering::SeqCst);
        let delay = *self.frames.capture_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.frames.fail.load(Ordering::SeqCst) {
            return Err(CaptureError::Source("display asleep".into()));
        }
        Ok(CapturedFrame {
            image: Bytes::from_static(b"jpeg"),
            mime_type: "image/jpeg",
            width: 4,
            height: 4,
            app_name: request.app_hint.unwrap_or_else(|| "Unknown".into()),
            window_title: request.window_hint,
            frame_number: request.frame_number,
            captured_at: Utc::now(),
            phash: None,
        })
    }
}

#[derive(Debug, Default)]
pub struct Journal {
    pub built: usize,
    pub analyzed: Vec<(u64, String)>,
    pub cleared: usize,
    pub switches: Vec<String>,
}

/// Assistant that analyses every frame it is offered and records what it saw.
pub struct RecordingAssistant {
    journal: Arc<Mutex<Journal>>,
    settings: AssistantSettings,
}

#[async_trait]
impl Assistant for RecordingAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Focus
    }

    fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    fn update_settings(&mut self, settings: AssistantSettings) {
        self.settings = settings;
    }

    async fn analyze(&mut self, frame: &CapturedFrame) -> Result<Option<AssistantResult>> {
        self.journal
            .lock()
            .unwrap()
            .analyzed
            .push((frame.frame_number, frame.app_name.clone()));
        Ok(None)
    }

    fn handle_result(&mut self, _result: AssistantResult, _emit: &mut dyn FnMut(MonitorEvent)) {}

    fn on_app_switch(&mut self, new_app: &str) {
        self.journal.lock().unwrap().switches.push(new_app.to_string());
    }

    fn clear_pending_work(&mut self) {
        self.journal.lock().unwrap().cleared += 1;
    }
}

pub fn recording_assistants(journal: Arc<Mutex<Journal>>) -> AssistantFactory {
    Arc::new(move |_config: &MonitorConfig| {
        journal.lock().unwrap().built += 1;
        vec![Box::new(RecordingAssistant {
            journal: Arc::clone(&journal),
            settings: AssistantSettings {
                min_interval_secs: 0,
                confidence_threshold: 0.0,
                skip_unchanged_frames: false,
                ..AssistantSettings::default()
            },
        }) as Box<dyn Assistant>]
    })
}

/// Keeps the frame number and app of everything it is handed.
#[derive(Default)]
pub struct RecordingIndexer {
    frames: Mutex<Vec<(u64, String)>>,
}

impl RecordingIndexer {
    pub fn frames(&self) -> Vec<(u64, String)> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameIndexer for RecordingIndexer {
    fn index(&self, frame: &CapturedFrame) {
        self.frames
            .lock()
            .unwrap()
            .push((frame.frame_number, frame.app_name.clone()));
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    sent: AtomicUsize,
}

impl CountingNotifier {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Notifier for CountingNotifier {
    fn notify(&self, _title: &str, _message: &str) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }
}

/// 1 s ticks, 3 s debounce, fast observer and worker polls.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        capture_interval_ms: 1000,
        analysis_delay_ms: 3000,
        failure_threshold: 5,
        observer_poll_ms: 100,
        worker_poll_ms: 100,
        ..MonitorConfig::default()
    }
}

pub struct Harness {
    pub monitor: Monitor,
    pub activation: Arc<FakeActivation>,
    pub capture: Arc<FakeCapture>,
    pub frames: Arc<FakeFrames>,
    pub journal: Arc<Mutex<Journal>>,
    pub notifier: Arc<CountingNotifier>,
    pub indexer: Arc<RecordingIndexer>,
}

impl Harness {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_capture(config, FakeCapture::new())
    }

    pub fn with_capture(config: MonitorConfig, capture: Arc<FakeCapture>) -> Self {
        let activation = FakeActivation::new("Finder");
        let frames = FakeFrames::new();
        let journal = Arc::new(Mutex::new(Journal::default()));
        let notifier = Arc::new(CountingNotifier::default());
        let indexer = Arc::new(RecordingIndexer::default());

        let deps = MonitorDeps {
            activation: activation.clone(),
            capture: capture.clone(),
            frame_sources: frames.factory(),
            assistants: recording_assistants(Arc::clone(&journal)),
            notifier: notifier.clone(),
            indexer: None,
        }
        .with_indexer(indexer.clone());

        Self {
            monitor: Monitor::new(deps, config),
            activation,
            capture,
            frames,
            journal,
            notifier,
            indexer,
        }
    }

    pub fn analyzed(&self) -> Vec<(u64, String)> {
        self.journal.lock().unwrap().analyzed.clone()
    }
}

/// Drains whatever is buffered on an event receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
