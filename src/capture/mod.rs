pub mod encode;
pub mod phash;
pub mod screen;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::settings::MonitorConfig;

pub use screen::ScreenFrameSource;

/// One compressed snapshot of the focused window. Never mutated after capture.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFrame {
    #[serde(skip)]
    pub image: Bytes,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub app_name: String,
    pub window_title: Option<String>,
    pub frame_number: u64,
    pub captured_at: DateTime<Utc>,
    /// Perceptual hash of the downscaled image (base64), when computable.
    pub phash: Option<String>,
}

/// What the scheduler knows when it asks for a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub frame_number: u64,
    pub app_hint: Option<String>,
    pub window_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    /// Returned by a `CaptureSource` when the OS refuses the grab.
    #[error("screen capture permission denied")]
    PermissionDenied,
    #[error("no focused window to capture")]
    NoFocusedWindow,
    #[error("window unavailable: {0}")]
    WindowUnavailable(String),
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("capture source failed: {0}")]
    Source(String),
}

/// Raw pixels handed back by the OS adapter, in any format `image` can decode.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub data: Vec<u8>,
    pub app_name: String,
    pub window_title: Option<String>,
}

/// The OS image-capture capability.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture_focused_window(&self) -> Result<RawCapture, CaptureError>;

    async fn check_permission(&self) -> bool;

    /// Opens the OS privacy pane where capture permission is granted.
    fn open_settings(&self) -> anyhow::Result<()>;
}

/// Produces `CapturedFrame`s. Instances are disposable: the monitor drops and
/// rebuilds them after sleep, unlock, or a capture outage.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self, request: CaptureRequest) -> Result<CapturedFrame, CaptureError>;
}

/// Receives every successful capture, including frames withheld from the
/// assistants during a delay window.
pub trait FrameIndexer: Send + Sync {
    fn index(&self, frame: &CapturedFrame);
}

pub type FrameSourceFactory = Arc<dyn Fn(&MonitorConfig) -> Arc<dyn FrameSource> + Send + Sync>;

/// Factory building a `ScreenFrameSource` over the given OS adapter.
pub fn screen_frame_sources(source: Arc<dyn CaptureSource>) -> FrameSourceFactory {
    Arc::new(move |config: &MonitorConfig| {
        Arc::new(ScreenFrameSource::new(
            Arc::clone(&source),
            config.image.clone(),
            config.capture_timeout(),
        )) as Arc<dyn FrameSource>
    })
}
