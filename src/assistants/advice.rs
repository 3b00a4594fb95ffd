use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::recent::RecentWindow;
use super::{ask_about_frame, frame_context, Assistant, AssistantKind, AssistantResult};
use crate::analysis::AnalysisBackend;
use crate::capture::CapturedFrame;
use crate::events::MonitorEvent;
use crate::settings::AssistantSettings;

const SYSTEM_PROMPT: &str = "You are a thoughtful assistant looking over the user's shoulder. \
Offer one specific, non-obvious piece of advice only when the screen shows a clear opportunity \
to save time, avoid a mistake, or look after themselves. Most of the time there is nothing \
worth saying; then set has_advice to false.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdviceCategory {
    Productivity,
    Health,
    Communication,
    Learning,
    Other,
}

impl Default for AdviceCategory {
    fn default() -> Self {
        AdviceCategory::Other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceResult {
    pub content: String,
    pub category: AdviceCategory,
    pub reasoning: Option<String>,
    pub source_app: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct AdviceResponse {
    has_advice: bool,
    #[serde(default)]
    advice: Option<ExtractedAdvice>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ExtractedAdvice {
    content: String,
    #[serde(default)]
    category: AdviceCategory,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct AdviceAssistant {
    backend: Arc<dyn AnalysisBackend>,
    settings: AssistantSettings,
    recent: RecentWindow,
}

impl AdviceAssistant {
    pub fn new(backend: Arc<dyn AnalysisBackend>, settings: AssistantSettings) -> Self {
        Self {
            backend,
            recent: RecentWindow::new(settings.recent_window),
            settings,
        }
    }
}

#[async_trait]
impl Assistant for AdviceAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Advice
    }

    fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    fn update_settings(&mut self, settings: AssistantSettings) {
        self.recent.resize(settings.recent_window);
        self.settings = settings;
    }

    async fn analyze(&mut self, frame: &CapturedFrame) -> Result<Option<AssistantResult>> {
        let prompt = format!(
            "{}\n\nIs there one piece of advice worth interrupting the user for?{}",
            frame_context(frame),
            self.recent
                .as_prompt_context("Advice already given (do not repeat or rephrase):")
        );

        let response: AdviceResponse = ask_about_frame(
            self.backend.as_ref(),
            AssistantKind::Advice,
            SYSTEM_PROMPT,
            prompt,
            frame,
            json!({
                "type": "object",
                "properties": {
                    "has_advice": { "type": "boolean" },
                    "advice": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "category": {
                                "type": "string",
                                "enum": ["productivity", "health", "communication", "learning", "other"]
                            },
                            "reasoning": { "type": "string" }
                        },
                        "required": ["content", "category"]
                    },
                    "confidence": { "type": "number" }
                },
                "required": ["has_advice", "confidence"]
            }),
        )
        .await?;

        let advice = match response.advice {
            Some(advice) if response.has_advice && !advice.content.trim().is_empty() => advice,
            _ => return Ok(None),
        };
        if self.recent.contains(&advice.content) {
            log::debug!("advice already given; dropping repeat");
            return Ok(None);
        }

        Ok(Some(AssistantResult::Advice(AdviceResult {
            content: advice.content.trim().to_string(),
            category: advice.category,
            reasoning: advice.reasoning,
            source_app: frame.app_name.clone(),
            confidence: response.confidence,
        })))
    }

    fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent)) {
        let AssistantResult::Advice(result) = result else {
            log::warn!("advice assistant handed a {:?} result", result.kind());
            return;
        };
        self.recent.push(result.content.clone());
        emit(MonitorEvent::AdviceResult { payload: result });
    }
}
