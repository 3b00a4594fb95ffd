use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    pub app_name: String,
    pub window_title: Option<String>,
}

/// OS query for the frontmost application and its focused window.
#[async_trait]
pub trait ActivationSource: Send + Sync {
    /// `Ok(None)` when nothing has focus (login window, empty desktop).
    async fn frontmost(&self) -> Result<Option<ForegroundWindow>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    AppActivated {
        app: String,
        window_title: Option<String>,
    },
    WindowChanged {
        app: String,
        window_title: String,
    },
}

/// Polls an `ActivationSource` and reports foreground changes.
///
/// Never reports the same application twice in a row, and only reports a
/// window change when the title actually differs. Query failures are retried
/// on the next poll and never surface.
pub struct WindowObserver {
    source: Arc<dyn ActivationSource>,
    poll: Duration,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl WindowObserver {
    pub fn new(source: Arc<dyn ActivationSource>, poll: Duration) -> Self {
        Self {
            source,
            poll,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start<F>(&mut self, on_event: F, cancel_token: CancellationToken) -> Result<()>
    where
        F: Fn(WindowEvent) + Send + Sync + 'static,
    {
        if self.handle.is_some() {
            bail!("window observer already active");
        }

        let handle = tokio::spawn(observe_loop(
            Arc::clone(&self.source),
            self.poll,
            on_event,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancels the poll loop. Safe to call when not started.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.handle.take()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for WindowObserver {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

async fn observe_loop<F>(
    source: Arc<dyn ActivationSource>,
    poll: Duration,
    on_event: F,
    cancel_token: CancellationToken,
) where
    F: Fn(WindowEvent) + Send + Sync + 'static,
{
    let mut ticker = time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<ForegroundWindow> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("window observer shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        let current = match source.frontmost().await {
            Ok(Some(current)) => current,
            Ok(None) => continue,
            Err(err) => {
                log_debug!("frontmost window query failed, retrying next poll: {err:#}");
                continue;
            }
        };

        if cancel_token.is_cancelled() {
            break;
        }

        if let Some(event) = diff(last.as_ref(), &current) {
            on_event(event);
        }
        last = Some(current);
    }
}

fn diff(previous: Option<&ForegroundWindow>, current: &ForegroundWindow) -> Option<WindowEvent> {
    match previous {
        Some(previous) if previous.app_name == current.app_name => {
            match &current.window_title {
                Some(title) if previous.window_title.as_ref() != Some(title) => {
                    Some(WindowEvent::WindowChanged {
                        app: current.app_name.clone(),
                        window_title: title.clone(),
                    })
                }
                _ => None,
            }
        }
        _ => Some(WindowEvent::AppActivated {
            app: current.app_name.clone(),
            window_title: current.window_title.clone(),
        }),
    }
}
