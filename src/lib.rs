//! Watches the foreground window, captures it on a schedule, and fans each
//! frame out to a set of analysis assistants.
//!
//! The entry point is [`Monitor`]: build it from [`MonitorDeps`] and a
//! [`MonitorConfig`], then drive it with `start_monitoring` /
//! `stop_monitoring` and listen on `subscribe()`.

pub mod analysis;
pub mod assistants;
pub mod capture;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod recovery;
pub mod scheduler;
pub mod settings;
pub mod window;

mod utils;

pub use analysis::{AnalysisBackend, AnalysisRequest, GeminiBackend};
pub use assistants::{Assistant, AssistantCoordinator, AssistantKind, AssistantResult};
pub use capture::{
    CaptureError, CaptureRequest, CaptureSource, CapturedFrame, FrameIndexer, FrameSource,
    RawCapture, ScreenFrameSource,
};
pub use events::{EventBus, MonitorEvent};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use monitor::{Monitor, MonitorDeps, MonitorStatus, PowerEvent, SessionState};
pub use notify::{LogNotifier, Notifier};
pub use settings::{MonitorConfig, SettingsStore};
pub use window::{ActivationSource, ForegroundWindow, WindowEvent, WindowObserver};

/// Installs the `env_logger` backend at `Info`, overridable through
/// `RUST_LOG`. Later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
