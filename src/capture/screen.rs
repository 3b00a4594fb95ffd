use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::time::{self, Instant};

use super::encode::prepare_image;
use super::{CaptureError, CaptureRequest, CaptureSource, CapturedFrame, FrameSource, RawCapture};
use crate::settings::ImageConfig;

/// `FrameSource` over an OS capture adapter: grab, downscale, compress.
pub struct ScreenFrameSource {
    source: Arc<dyn CaptureSource>,
    image: ImageConfig,
    timeout: Duration,
}

impl ScreenFrameSource {
    pub fn new(source: Arc<dyn CaptureSource>, image: ImageConfig, timeout: Duration) -> Self {
        Self {
            source,
            image,
            timeout,
        }
    }

    async fn capture_inner(&self, request: CaptureRequest) -> Result<CapturedFrame, CaptureError> {
        let started = Instant::now();
        let RawCapture {
            data,
            app_name,
            window_title,
        } = self.source.capture_focused_window().await?;
        let grab_ms = started.elapsed().as_millis();

        let image = self.image.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            prepare_image(&data, image.max_dimension, image.max_bytes, image.jpeg_quality)
        })
        .await
        .map_err(|err| CaptureError::Encode(format!("encode worker join failed: {err}")))??;

        let app_name = if app_name.is_empty() {
            request.app_hint.unwrap_or_default()
        } else {
            app_name
        };

        log::debug!(
            "frame {} captured: {} bytes {}x{} for {} (grab {}ms, total {}ms)",
            request.frame_number,
            encoded.data.len(),
            encoded.width,
            encoded.height,
            app_name,
            grab_ms,
            started.elapsed().as_millis()
        );

        Ok(CapturedFrame {
            image: Bytes::from(encoded.data),
            mime_type: "image/jpeg",
            width: encoded.width,
            height: encoded.height,
            app_name,
            window_title: window_title.or(request.window_hint),
            frame_number: request.frame_number,
            captured_at: Utc::now(),
            phash: Some(encoded.phash),
        })
    }
}

#[async_trait]
impl FrameSource for ScreenFrameSource {
    async fn capture(&self, request: CaptureRequest) -> Result<CapturedFrame, CaptureError> {
        match time::timeout(self.timeout, self.capture_inner(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CaptureError::Timeout(self.timeout)),
        }
    }
}
