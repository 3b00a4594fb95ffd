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

const SYSTEM_PROMPT: &str = "You pick out durable facts about the user worth remembering long \
term: people they work with, projects, preferences, tools, recurring commitments. Each memory \
is one short sentence of at most 15 words. Skip anything transient or already known.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryCategory {
    /// Facts about the user's setup and routines.
    System,
    /// Things the user would find worth recalling.
    Interesting,
}

impl Default for MemoryCategory {
    fn default() -> Self {
        MemoryCategory::System
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResult {
    pub content: String,
    pub category: MemoryCategory,
    pub source_app: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct MemoryResponse {
    #[serde(default)]
    memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    content: String,
    #[serde(default)]
    category: MemoryCategory,
    #[serde(default)]
    confidence: f64,
}

pub struct MemoryAssistant {
    backend: Arc<dyn AnalysisBackend>,
    settings: AssistantSettings,
    recent: RecentWindow,
}

impl MemoryAssistant {
    pub fn new(backend: Arc<dyn AnalysisBackend>, settings: AssistantSettings) -> Self {
        Self {
            backend,
            recent: RecentWindow::new(settings.recent_window),
            settings,
        }
    }
}

#[async_trait]
impl Assistant for MemoryAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Memory
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
            "{}\n\nList any new long-term memories visible on screen.{}",
            frame_context(frame),
            self.recent
                .as_prompt_context("Memories already saved (never return these or near-duplicates):")
        );

        let response: MemoryResponse = ask_about_frame(
            self.backend.as_ref(),
            AssistantKind::Memory,
            SYSTEM_PROMPT,
            prompt,
            frame,
            json!({
                "type": "object",
                "properties": {
                    "memories": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": { "type": "string" },
                                "category": { "type": "string", "enum": ["system", "interesting"] },
                                "confidence": { "type": "number" }
                            },
                            "required": ["content", "category", "confidence"]
                        }
                    }
                },
                "required": ["memories"]
            }),
        )
        .await?;

        let mut fresh: Vec<MemoryResult> = Vec::new();
        for memory in response.memories {
            let content = memory.content.trim();
            if content.is_empty() || self.recent.contains(content) {
                continue;
            }
            if fresh
                .iter()
                .any(|kept| kept.content.eq_ignore_ascii_case(content))
            {
                continue;
            }
            fresh.push(MemoryResult {
                content: content.to_string(),
                category: memory.category,
                source_app: frame.app_name.clone(),
                confidence: memory.confidence,
            });
        }

        Ok((!fresh.is_empty()).then_some(AssistantResult::Memory(fresh)))
    }

    fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent)) {
        let AssistantResult::Memory(memories) = result else {
            log::warn!("memory assistant handed a {:?} result", result.kind());
            return;
        };

        for memory in memories {
            if memory.confidence < self.settings.confidence_threshold {
                log::info!(
                    "discarding memory below confidence {:.2}: {:.2}",
                    self.settings.confidence_threshold,
                    memory.confidence
                );
                continue;
            }
            self.recent.push(memory.content.clone());
            emit(MonitorEvent::MemoryResult { payload: memory });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::test_support::{collect, frame, ScriptedBackend};

    #[tokio::test]
    async fn emits_each_confident_memory_and_dedupes() {
        let backend = ScriptedBackend::ok(json!({
            "memories": [
                { "content": "Works with Priya on the billing rewrite", "category": "system", "confidence": 0.9 },
                { "content": "works with priya on the billing rewrite", "category": "system", "confidence": 0.9 },
                { "content": "Might like jazz", "category": "interesting", "confidence": 0.3 }
            ]
        }));
        let settings = AssistantSettings {
            confidence_threshold: 0.7,
            ..AssistantSettings::default()
        };
        let mut memory = MemoryAssistant::new(backend.clone(), settings);

        let result = memory.analyze(&frame(4, "Slack")).await.unwrap().unwrap();
        let events = collect(&mut memory, result);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MonitorEvent::MemoryResult { payload } => {
                assert_eq!(payload.content, "Works with Priya on the billing rewrite");
                assert_eq!(payload.source_app, "Slack");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // The saved memory is now negative context and filtered out of replies.
        let again = memory.analyze(&frame(5, "Slack")).await.unwrap().unwrap();
        let AssistantResult::Memory(entries) = again else {
            panic!("expected memories");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "Might like jazz");
        assert!(backend
            .last_prompt()
            .contains("- Works with Priya on the billing rewrite"));
    }

    #[tokio::test]
    async fn empty_list_yields_nothing() {
        let backend = ScriptedBackend::ok(json!({ "memories": [] }));
        let mut memory = MemoryAssistant::new(backend, AssistantSettings::default());
        assert!(memory.analyze(&frame(1, "Slack")).await.unwrap().is_none());
    }
}
