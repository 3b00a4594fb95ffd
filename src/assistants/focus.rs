use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use super::{ask_about_frame, frame_context, Assistant, AssistantKind, AssistantResult};
use crate::analysis::AnalysisBackend;
use crate::capture::CapturedFrame;
use crate::events::MonitorEvent;
use crate::settings::AssistantSettings;

const SYSTEM_PROMPT: &str = "You watch a single screenshot of the user's screen and judge \
whether they are focused on productive work or distracted. Social feeds, entertainment video, \
games and shopping count as distracted unless the window title shows they are work related. \
Answer only with the requested JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusStatus {
    Focused,
    Distracted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusResult {
    pub status: FocusStatus,
    pub app_or_site: String,
    pub description: String,
    pub message: Option<String>,
    pub source_app: String,
    pub frame_number: u64,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct FocusResponse {
    status: FocusStatus,
    #[serde(default)]
    app_or_site: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    message: Option<String>,
    confidence: f64,
}

pub struct FocusAssistant {
    backend: Arc<dyn AnalysisBackend>,
    settings: AssistantSettings,
    alert_cooldown: Duration,
    last_status: Option<FocusStatus>,
    last_alert: Option<Instant>,
    current_app: Option<String>,
}

impl FocusAssistant {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        settings: AssistantSettings,
        alert_cooldown: Duration,
    ) -> Self {
        Self {
            backend,
            settings,
            alert_cooldown,
            last_status: None,
            last_alert: None,
            current_app: None,
        }
    }

    fn alert_allowed(&self) -> bool {
        self.last_alert
            .map_or(true, |at| at.elapsed() >= self.alert_cooldown)
    }
}

#[async_trait]
impl Assistant for FocusAssistant {
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
        let mut prompt = frame_context(frame);
        if let Some(app) = self.current_app.as_deref().filter(|app| *app != frame.app_name) {
            prompt.push_str(&format!("\nMost recent app switch: {app}"));
        }
        if let Some(status) = self.last_status {
            prompt.push_str(&format!(
                "\nPrevious assessment: {}",
                match status {
                    FocusStatus::Focused => "focused",
                    FocusStatus::Distracted => "distracted",
                }
            ));
        }
        prompt.push_str(
            "\n\nIs the user focused or distracted right now? If distracted, write a short, \
             friendly nudge in `message`.",
        );

        let response: FocusResponse = ask_about_frame(
            self.backend.as_ref(),
            AssistantKind::Focus,
            SYSTEM_PROMPT,
            prompt,
            frame,
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["focused", "distracted"] },
                    "app_or_site": { "type": "string" },
                    "description": { "type": "string" },
                    "message": { "type": "string" },
                    "confidence": { "type": "number" }
                },
                "required": ["status", "app_or_site", "description", "confidence"]
            }),
        )
        .await?;

        Ok(Some(AssistantResult::Focus(FocusResult {
            status: response.status,
            app_or_site: response.app_or_site,
            description: response.description,
            message: response.message.filter(|message| !message.trim().is_empty()),
            source_app: frame.app_name.clone(),
            frame_number: frame.frame_number,
            confidence: response.confidence,
        })))
    }

    fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent)) {
        let AssistantResult::Focus(result) = result else {
            log::warn!("focus assistant handed a {:?} result", result.kind());
            return;
        };

        let became_distracted = result.status == FocusStatus::Distracted
            && self.last_status != Some(FocusStatus::Distracted);
        self.last_status = Some(result.status);

        if became_distracted && self.alert_allowed() {
            let message = result
                .message
                .clone()
                .unwrap_or_else(|| format!("Looks like {} pulled you away.", result.app_or_site));
            self.last_alert = Some(Instant::now());
            emit(MonitorEvent::Alert { message });
        }

        emit(MonitorEvent::FocusResult { payload: result });
    }

    fn on_app_switch(&mut self, new_app: &str) {
        self.current_app = Some(new_app.to_string());
    }

    fn clear_pending_work(&mut self) {
        // The next verdict is about a different context; don't treat it as a
        // continuation of the previous one.
        self.last_status = None;
    }
}
