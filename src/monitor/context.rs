use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::{MonitoringSession, SessionState, StartDecision};
use super::{MonitorDeps, MonitorStatus, PowerEvent};
use crate::assistants::worker::WorkerTiming;
use crate::assistants::AssistantCoordinator;
use crate::capture::{CaptureError, CaptureRequest, CapturedFrame, FrameSource};
use crate::events::{EventBus, MonitorEvent};
use crate::metrics::{CaptureMetrics, CaptureOutcome, MetricsCollector};
use crate::recovery::{FailureRecovery, PermissionVerdict, RecoveryAction, UnlockAction};
use crate::scheduler::{CaptureScheduler, SchedulerPhase, SwitchOutcome, TickDecision};
use crate::settings::MonitorConfig;
use crate::window::{WindowEvent, WindowObserver};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const PERMISSION_LOST_TITLE: &str = "Screen capture paused";
const PERMISSION_LOST_MESSAGE: &str =
    "Screen recording permission was revoked. Grant it again in System Settings to resume monitoring.";

pub(crate) type StartReply = oneshot::Sender<Result<()>>;

/// Everything that can change scheduler state arrives as one of these and is
/// handled to completion before the next.
pub(crate) enum ControlMessage {
    Start(Option<StartReply>),
    Stop,
    PermissionRefreshed(bool),
    UpdateConfig(Box<MonitorConfig>),
    Power(PowerEvent),
    Window {
        generation: u64,
        event: WindowEvent,
    },
    StartPermissionChecked {
        generation: u64,
        granted: bool,
    },
    RecoveryPermissionChecked {
        generation: u64,
        granted: bool,
    },
    CaptureFinished {
        generation: u64,
        epoch: u64,
        frame_number: u64,
        result: Result<CapturedFrame, CaptureError>,
        elapsed: Duration,
    },
    WorkersStopped {
        generation: u64,
    },
}

enum Step {
    Message(ControlMessage),
    Tick,
    DelayElapsed,
    Shutdown,
}

/// The single owner of scheduler, recovery and session state.
pub(crate) struct MonitorContext {
    deps: MonitorDeps,
    config: MonitorConfig,
    control: mpsc::WeakUnboundedSender<ControlMessage>,
    status: watch::Sender<MonitorStatus>,
    events: EventBus,
    metrics: MetricsCollector,
    session: MonitoringSession,
    scheduler: CaptureScheduler,
    recovery: FailureRecovery,
    has_permission: bool,
    pending_start: Option<StartReply>,
    frame_source: Option<Arc<dyn FrameSource>>,
    source_epoch: u64,
    coordinator: Option<AssistantCoordinator>,
    observer: Option<WindowObserver>,
    ticker: Option<Interval>,
}

impl MonitorContext {
    pub(crate) fn new(
        deps: MonitorDeps,
        config: MonitorConfig,
        control: mpsc::WeakUnboundedSender<ControlMessage>,
        status: watch::Sender<MonitorStatus>,
        events: EventBus,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            scheduler: CaptureScheduler::new(&config),
            recovery: FailureRecovery::new(config.failure_threshold),
            deps,
            config,
            control,
            status,
            events,
            metrics,
            session: MonitoringSession::new(),
            has_permission: false,
            pending_start: None,
            frame_source: None,
            source_epoch: 0,
            coordinator: None,
            observer: None,
            ticker: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlMessage>) {
        self.spawn_permission_check(ControlMessage::PermissionRefreshed);

        loop {
            let delay_deadline = self.scheduler.delay_deadline();
            let step = tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(message) => Step::Message(message),
                    None => Step::Shutdown,
                },
                _ = sleep_until_opt(delay_deadline) => Step::DelayElapsed,
                _ = tick_opt(&mut self.ticker) => Step::Tick,
            };

            match step {
                Step::Message(message) => self.handle_message(message),
                Step::Tick => self.on_tick(),
                Step::DelayElapsed => {
                    self.scheduler.on_delay_elapsed(Instant::now());
                }
                Step::Shutdown => break,
            }
            self.publish_status();
        }

        self.shutdown();
    }

    fn handle_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Start(reply) => self.handle_start(reply),
            ControlMessage::Stop => self.handle_stop(),
            ControlMessage::PermissionRefreshed(granted) => {
                if granted != self.has_permission {
                    log_info!("capture permission now {}", if granted { "granted" } else { "denied" });
                }
                self.has_permission = granted;
            }
            ControlMessage::UpdateConfig(config) => self.apply_config(*config),
            ControlMessage::Power(event) => self.handle_power(event),
            ControlMessage::Window { generation, event } => {
                if self.is_current(generation) {
                    self.handle_window_event(event);
                }
            }
            ControlMessage::StartPermissionChecked { generation, granted } => {
                self.finish_start(generation, granted)
            }
            ControlMessage::RecoveryPermissionChecked { generation, granted } => {
                if self.is_current(generation) {
                    self.handle_recovery_check(granted);
                }
            }
            ControlMessage::CaptureFinished {
                generation,
                epoch,
                frame_number,
                result,
                elapsed,
            } => self.handle_capture_finished(generation, epoch, frame_number, result, elapsed),
            ControlMessage::WorkersStopped { generation } => self.finish_stop(generation),
        }
    }

    fn handle_start(&mut self, reply: Option<StartReply>) {
        match self.session.begin_start() {
            Ok(StartDecision::AlreadyRunning) => {
                log_debug!("start requested while running; nothing to do");
                respond(reply, Ok(()));
            }
            Ok(StartDecision::Begin(generation)) => {
                log_info!("starting monitoring (generation {})", generation);
                self.pending_start = reply;
                self.emit_state();
                self.spawn_permission_check(move |granted| ControlMessage::StartPermissionChecked {
                    generation,
                    granted,
                });
            }
            Err(err) => {
                log_warn!("start rejected: {err}");
                respond(reply, Err(err));
            }
        }
    }

    fn finish_start(&mut self, generation: u64, granted: bool) {
        if self.session.generation() != generation || self.session.state() != SessionState::Starting {
            log_debug!("stale start permission result for generation {}", generation);
            return;
        }
        self.has_permission = granted;

        if !granted {
            log_warn!("cannot start monitoring: screen capture permission not granted");
            self.session.abort_start();
            self.emit_state();
            self.publish_status();
            respond(
                self.pending_start.take(),
                Err(anyhow!("screen capture permission not granted")),
            );
            return;
        }

        self.scheduler.reset();
        self.recovery.reset();
        self.rebuild_frame_source();

        let mut coordinator = AssistantCoordinator::new(
            self.events.clone(),
            WorkerTiming {
                poll: self.config.worker_poll(),
                analysis_timeout: self.config.analysis_timeout(),
            },
        );
        for assistant in (self.deps.assistants)(&self.config) {
            coordinator.register(assistant);
        }
        log_info!("assistants running: {:?}", coordinator.kinds());
        self.coordinator = Some(coordinator);

        let mut observer = WindowObserver::new(
            Arc::clone(&self.deps.activation),
            self.config.observer_poll(),
        );
        let control = self.control.clone();
        let started = observer.start(
            move |event| {
                if let Some(tx) = control.upgrade() {
                    let _ = tx.send(ControlMessage::Window { generation, event });
                }
            },
            CancellationToken::new(),
        );
        if let Err(err) = started {
            log_error!("window observer failed to start: {err:#}");
        }
        self.observer = Some(observer);

        self.ticker = if self.recovery.is_locked() {
            log_info!("screen is locked; capture ticks wait for unlock");
            None
        } else {
            Some(new_ticker(self.scheduler.interval()))
        };

        self.session.mark_running(generation);
        let session_id = self.session.session_id().unwrap_or_default().to_string();
        log_info!("monitoring session {} running", session_id);
        self.events.emit(MonitorEvent::MonitoringStarted { session_id });
        self.emit_state();
        self.publish_status();
        respond(self.pending_start.take(), Ok(()));
    }

    fn handle_stop(&mut self) {
        match self.session.state() {
            SessionState::Running => self.begin_stop(),
            SessionState::Starting => {
                log_info!("stop requested while starting; aborting start");
                self.session.abort_start();
                self.emit_state();
                self.publish_status();
                respond(
                    self.pending_start.take(),
                    Err(anyhow!("monitoring was stopped before it finished starting")),
                );
            }
            SessionState::Stopping | SessionState::Stopped => {
                log_debug!("stop requested while {:?}; nothing to do", self.session.state());
            }
        }
    }

    fn begin_stop(&mut self) {
        if !self.session.begin_stop() {
            return;
        }
        log_info!("stopping monitoring session");
        self.emit_state();

        self.ticker = None;
        self.scheduler.reset();
        self.frame_source = None;

        let mut handles = self.teardown_workers();
        let generation = self.session.generation();
        let grace = self.config.stop_grace();

        let Some(tx) = self.control.upgrade() else {
            handles.clear();
            self.finish_stop(generation);
            return;
        };
        tokio::spawn(async move {
            let joined = time::timeout(grace, async {
                for handle in handles {
                    let _ = handle.await;
                }
            })
            .await;
            if joined.is_err() {
                log::warn!("assistant workers did not exit within {grace:?}; detaching");
            }
            let _ = tx.send(ControlMessage::WorkersStopped { generation });
        });
    }

    fn finish_stop(&mut self, generation: u64) {
        if self.session.generation() != generation || self.session.state() != SessionState::Stopping {
            return;
        }
        let session_id = self.session.mark_stopped();
        log_info!("monitoring session {:?} stopped", session_id);
        self.events.emit(MonitorEvent::MonitoringStopped { session_id });
        self.emit_state();
    }

    fn teardown_workers(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(mut observer) = self.observer.take() {
            handles.extend(observer.stop());
        }
        if let Some(mut coordinator) = self.coordinator.take() {
            handles.extend(coordinator.stop_all());
        }
        handles
    }

    fn shutdown(&mut self) {
        log_info!("monitor handle dropped; shutting down");
        self.ticker = None;
        self.teardown_workers();
        if self.session.state() != SessionState::Stopped {
            self.session.mark_stopped();
        }
    }

    fn on_tick(&mut self) {
        if !self.session.is_running() {
            return;
        }
        match self.scheduler.on_tick(Instant::now()) {
            TickDecision::Capture(request) => self.spawn_capture(request),
            TickDecision::Skip(reason) => log_debug!("tick skipped: {:?}", reason),
        }
    }

    fn spawn_capture(&mut self, request: CaptureRequest) {
        let Some(source) = self.frame_source.clone() else {
            self.scheduler.capture_finished();
            return;
        };
        let Some(tx) = self.control.upgrade() else {
            self.scheduler.capture_finished();
            return;
        };

        let generation = self.session.generation();
        let epoch = self.source_epoch;
        let timeout = self.config.capture_timeout();
        let frame_number = request.frame_number;

        tokio::spawn(async move {
            let started = Instant::now();
            let result = match time::timeout(timeout, source.capture(request)).await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::Timeout(timeout)),
            };
            let _ = tx.send(ControlMessage::CaptureFinished {
                generation,
                epoch,
                frame_number,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    fn handle_capture_finished(
        &mut self,
        generation: u64,
        epoch: u64,
        frame_number: u64,
        result: Result<CapturedFrame, CaptureError>,
        elapsed: Duration,
    ) {
        if generation != self.session.generation() {
            return;
        }
        self.scheduler.capture_finished();

        if !self.session.is_running() {
            log_debug!("discarding frame #{} captured after stop", frame_number);
            return;
        }
        if epoch != self.source_epoch {
            log_debug!("discarding frame #{} from a replaced frame source", frame_number);
            return;
        }

        match result {
            Ok(frame) => {
                self.recovery.record_success();
                let frame = Arc::new(frame);
                if let Some(indexer) = &self.deps.indexer {
                    indexer.index(&frame);
                }

                let distribute = self.scheduler.distribution_open(Instant::now());
                self.metrics.record_capture(CaptureMetrics {
                    timestamp: Utc::now(),
                    frame_number,
                    capture_ms: elapsed.as_millis() as u64,
                    frame_bytes: Some(frame.image.len()),
                    outcome: if distribute {
                        CaptureOutcome::Distributed
                    } else {
                        CaptureOutcome::Withheld
                    },
                });

                if distribute {
                    if let Some(coordinator) = &self.coordinator {
                        coordinator.distribute_frame(frame);
                    }
                } else {
                    log_debug!("frame #{} withheld: delay window active", frame_number);
                }
            }
            Err(err) => {
                log_warn!("capture of frame #{} failed: {err}", frame_number);
                self.metrics.record_capture(CaptureMetrics {
                    timestamp: Utc::now(),
                    frame_number,
                    capture_ms: elapsed.as_millis() as u64,
                    frame_bytes: None,
                    outcome: CaptureOutcome::Failed,
                });

                if self.recovery.record_failure() == RecoveryAction::CheckPermission {
                    let generation = self.session.generation();
                    self.spawn_permission_check(move |granted| {
                        ControlMessage::RecoveryPermissionChecked { generation, granted }
                    });
                }
            }
        }
    }

    fn handle_recovery_check(&mut self, granted: bool) {
        if !self.session.is_running() {
            return;
        }
        self.has_permission = granted;
        match self.recovery.on_permission_checked(granted) {
            PermissionVerdict::ReinitializeSource => self.rebuild_frame_source(),
            PermissionVerdict::PermissionLost => {
                self.events.emit(MonitorEvent::PermissionLost);
                self.events.emit(MonitorEvent::Alert {
                    message: PERMISSION_LOST_MESSAGE.to_string(),
                });
                self.deps
                    .notifier
                    .notify(PERMISSION_LOST_TITLE, PERMISSION_LOST_MESSAGE);
                self.begin_stop();
            }
        }
    }

    fn rebuild_frame_source(&mut self) {
        self.frame_source = Some((self.deps.frame_sources)(&self.config));
        self.source_epoch += 1;
        log_info!("frame source initialised (epoch {})", self.source_epoch);
    }

    fn handle_window_event(&mut self, event: WindowEvent) {
        let now = Instant::now();
        let outcome = match &event {
            WindowEvent::AppActivated { app, window_title } => {
                let outcome = self
                    .scheduler
                    .on_app_activated(app, window_title.as_deref(), now);
                if outcome.is_new_context() {
                    self.events.emit(MonitorEvent::AppSwitch { app: app.clone() });
                    if let Some(coordinator) = &self.coordinator {
                        coordinator.notify_app_switch(app);
                    }
                }
                outcome
            }
            WindowEvent::WindowChanged { app, window_title } => {
                self.scheduler.on_window_changed(app, window_title, now)
            }
        };

        match outcome {
            SwitchOutcome::DelayStarted { ends_at } => {
                log_debug!(
                    "delay window open for {:?}",
                    ends_at.saturating_duration_since(now)
                );
                if let Some(coordinator) = &self.coordinator {
                    coordinator.clear_all_pending_work();
                }
            }
            SwitchOutcome::CaptureNow => {
                if self.recovery.is_locked() || self.ticker.is_none() {
                    log_debug!("switch capture skipped: capture is paused");
                } else if let Some(request) = self.scheduler.immediate_capture() {
                    self.spawn_capture(request);
                }
            }
            SwitchOutcome::Ignored { .. } | SwitchOutcome::Initial | SwitchOutcome::Duplicate => {}
        }
    }

    fn handle_power(&mut self, event: PowerEvent) {
        let running = self.session.is_running();
        log_info!("power event {:?} (running: {})", event, running);

        match event {
            PowerEvent::WillSleep => self.recovery.will_sleep(running),
            PowerEvent::DidWake => {
                if self.recovery.did_wake() && running {
                    self.rebuild_frame_source();
                }
            }
            PowerEvent::ScreenLocked => {
                self.recovery.screen_locked(running);
                self.ticker = None;
            }
            PowerEvent::ScreenUnlocked => match self.recovery.screen_unlocked(running) {
                UnlockAction::ResumeTicking => {
                    self.rebuild_frame_source();
                    self.ticker = Some(new_ticker(self.scheduler.interval()));
                }
                UnlockAction::RestartSession => {
                    log_info!("session ended while locked; restarting");
                    self.handle_start(None);
                }
                UnlockAction::Nothing => {}
            },
        }
    }

    fn apply_config(&mut self, config: MonitorConfig) {
        let interval_changed = config.capture_interval() != self.scheduler.interval();
        let source_changed = config.image != self.config.image
            || config.capture_timeout_ms != self.config.capture_timeout_ms;
        self.scheduler.update(&config);
        self.recovery.set_threshold(config.failure_threshold);
        if let Some(coordinator) = &self.coordinator {
            coordinator.update_settings(&config.assistants);
        }
        self.config = config;

        if source_changed && self.frame_source.is_some() {
            self.rebuild_frame_source();
        }
        if interval_changed && self.ticker.is_some() {
            let interval = self.scheduler.interval();
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
        log_info!("configuration updated");
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.session.generation() && self.session.is_running()
    }

    fn spawn_permission_check<F>(&self, into_message: F)
    where
        F: FnOnce(bool) -> ControlMessage + Send + 'static,
    {
        let Some(tx) = self.control.upgrade() else {
            return;
        };
        let capture = Arc::clone(&self.deps.capture);
        tokio::spawn(async move {
            let granted = capture.check_permission().await;
            let _ = tx.send(into_message(granted));
        });
    }

    fn emit_state(&self) {
        self.events.emit(MonitorEvent::StatusChange {
            status: self.session.state(),
        });
    }

    fn publish_status(&self) {
        let status = MonitorStatus {
            state: self.session.state(),
            session_id: self.session.session_id().map(str::to_string),
            started_at: self.session.started_at(),
            has_capture_permission: self.has_permission,
            current_app: self.scheduler.current_app().map(str::to_string),
            locked: self.recovery.is_locked(),
            in_delay: self.scheduler.phase(Instant::now()) == SchedulerPhase::InDebounceDelay,
            failures: self.recovery.state(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

fn respond(reply: Option<StartReply>, result: Result<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
