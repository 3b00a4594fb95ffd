pub mod delay;

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::capture::CaptureRequest;
use crate::settings::MonitorConfig;

pub use delay::DelayWindow;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerPhase {
    Idle,
    Capturing,
    InDebounceDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InDebounceDelay,
    CaptureInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDecision {
    Capture(CaptureRequest),
    Skip(SkipReason),
}

/// What the coordination context should do about a reported switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// First report of the session: nothing to debounce against.
    Initial,
    /// Same app or window as already tracked.
    Duplicate,
    /// A new delay window began; pending assistant work must be cleared.
    DelayStarted { ends_at: Instant },
    /// A window was already running and keeps its original deadline.
    Ignored { ends_at: Instant },
    /// Debouncing is disabled; capture straight away.
    CaptureNow,
}

impl SwitchOutcome {
    pub fn is_new_context(&self) -> bool {
        !matches!(self, SwitchOutcome::Duplicate)
    }
}

/// Decides when to capture and whether a finished capture may be handed to
/// the assistants. Pure state; the caller supplies the clock.
#[derive(Debug)]
pub struct CaptureScheduler {
    interval: Duration,
    analysis_delay: Duration,
    delay: DelayWindow,
    current_app: Option<String>,
    current_window: Option<String>,
    capture_in_flight: bool,
    next_frame_number: u64,
}

impl CaptureScheduler {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            interval: config.capture_interval(),
            analysis_delay: config.analysis_delay(),
            delay: DelayWindow::default(),
            current_app: None,
            current_window: None,
            capture_in_flight: false,
            next_frame_number: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn current_app(&self) -> Option<&str> {
        self.current_app.as_deref()
    }

    pub fn phase(&self, now: Instant) -> SchedulerPhase {
        if self.delay.is_active(now) {
            SchedulerPhase::InDebounceDelay
        } else if self.capture_in_flight {
            SchedulerPhase::Capturing
        } else {
            SchedulerPhase::Idle
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> TickDecision {
        if self.delay.is_active(now) {
            return TickDecision::Skip(SkipReason::InDebounceDelay);
        }
        if self.capture_in_flight {
            return TickDecision::Skip(SkipReason::CaptureInFlight);
        }
        TickDecision::Capture(self.begin_capture())
    }

    /// Capture outside the tick cadence, used when debouncing is disabled.
    /// `None` while another capture is still running.
    pub fn immediate_capture(&mut self) -> Option<CaptureRequest> {
        if self.capture_in_flight {
            log_debug!("immediate capture skipped: capture already in flight");
            return None;
        }
        Some(self.begin_capture())
    }

    pub fn capture_finished(&mut self) {
        self.capture_in_flight = false;
    }

    /// Whether a capture completing at `now` may be distributed.
    pub fn distribution_open(&self, now: Instant) -> bool {
        !self.delay.is_active(now)
    }

    pub fn on_app_activated(
        &mut self,
        app: &str,
        window_title: Option<&str>,
        now: Instant,
    ) -> SwitchOutcome {
        if self.current_app.as_deref() == Some(app) {
            return SwitchOutcome::Duplicate;
        }
        let previous = self.current_app.replace(app.to_string());
        self.current_window = window_title.map(str::to_string);

        match previous {
            None => {
                log_info!("tracking initial app {}", app);
                SwitchOutcome::Initial
            }
            Some(previous) => {
                log_info!("app switch {} -> {}", previous, app);
                self.switch_outcome(now)
            }
        }
    }

    pub fn on_window_changed(&mut self, app: &str, window_title: &str, now: Instant) -> SwitchOutcome {
        if self.current_window.as_deref() == Some(window_title)
            && self.current_app.as_deref() == Some(app)
        {
            return SwitchOutcome::Duplicate;
        }
        let previous_app = self.current_app.replace(app.to_string());
        self.current_window = Some(window_title.to_string());

        if previous_app.is_none() {
            return SwitchOutcome::Initial;
        }
        log_debug!("window switch in {}: {}", app, window_title);
        self.switch_outcome(now)
    }

    /// Clears an elapsed window. Returns true if one was cleared.
    pub fn on_delay_elapsed(&mut self, now: Instant) -> bool {
        match self.delay.ends_at() {
            Some(ends_at) if ends_at <= now => {
                self.delay.clear();
                log_info!("delay window elapsed; distribution resumes next tick");
                true
            }
            _ => false,
        }
    }

    pub fn delay_deadline(&self) -> Option<Instant> {
        self.delay.ends_at()
    }

    /// Forgets session state. Frame numbers keep counting.
    pub fn reset(&mut self) {
        self.delay.clear();
        self.current_app = None;
        self.current_window = None;
        self.capture_in_flight = false;
    }

    pub fn update(&mut self, config: &MonitorConfig) {
        self.interval = config.capture_interval();
        self.analysis_delay = config.analysis_delay();
    }

    fn switch_outcome(&mut self, now: Instant) -> SwitchOutcome {
        if self.analysis_delay.is_zero() {
            return SwitchOutcome::CaptureNow;
        }
        if self.delay.begin(now, self.analysis_delay) {
            let ends_at = now + self.analysis_delay;
            log_info!("delay window started for {:?}", self.analysis_delay);
            SwitchOutcome::DelayStarted { ends_at }
        } else {
            // An active window always has a deadline.
            let ends_at = self.delay.ends_at().unwrap_or(now);
            log_debug!("switch during active delay window ignored");
            SwitchOutcome::Ignored { ends_at }
        }
    }

    fn begin_capture(&mut self) -> CaptureRequest {
        self.capture_in_flight = true;
        let frame_number = self.next_frame_number;
        self.next_frame_number += 1;
        CaptureRequest {
            frame_number,
            app_hint: self.current_app.clone(),
            window_hint: self.current_window.clone(),
        }
    }
}
