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

const SYSTEM_PROMPT: &str = "You extract concrete, actionable tasks the user has committed to \
or been asked to do, based on a screenshot of their screen. Ignore vague intentions, tasks that \
are already done, and anything that is just content being read. Return at most one task.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub tags: Vec<String>,
    pub context_summary: String,
    pub source_app: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    has_new_task: bool,
    #[serde(default)]
    task: Option<ExtractedTask>,
    #[serde(default)]
    context_summary: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ExtractedTask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: TaskPriority,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct TaskAssistant {
    backend: Arc<dyn AnalysisBackend>,
    settings: AssistantSettings,
    recent: RecentWindow,
}

impl TaskAssistant {
    pub fn new(backend: Arc<dyn AnalysisBackend>, settings: AssistantSettings) -> Self {
        Self {
            backend,
            recent: RecentWindow::new(settings.recent_window),
            settings,
        }
    }
}

#[async_trait]
impl Assistant for TaskAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Task
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
            "{}\n\nIs there a new task on screen the user should track?{}",
            frame_context(frame),
            self.recent
                .as_prompt_context("Tasks already extracted (do not return these or rewordings of them):")
        );

        let response: TaskResponse = ask_about_frame(
            self.backend.as_ref(),
            AssistantKind::Task,
            SYSTEM_PROMPT,
            prompt,
            frame,
            json!({
                "type": "object",
                "properties": {
                    "has_new_task": { "type": "boolean" },
                    "task": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                            "tags": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["title"]
                    },
                    "context_summary": { "type": "string" },
                    "confidence": { "type": "number" }
                },
                "required": ["has_new_task", "confidence"]
            }),
        )
        .await?;

        let task = match response.task {
            Some(task) if response.has_new_task && !task.title.trim().is_empty() => task,
            _ => return Ok(None),
        };
        if self.recent.contains(&task.title) {
            log::debug!("task '{}' already extracted; dropping repeat", task.title);
            return Ok(None);
        }

        Ok(Some(AssistantResult::Task(TaskResult {
            title: task.title.trim().to_string(),
            description: task.description,
            priority: task.priority,
            tags: task.tags,
            context_summary: response.context_summary,
            source_app: frame.app_name.clone(),
            confidence: response.confidence,
        })))
    }

    fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent)) {
        let AssistantResult::Task(result) = result else {
            log::warn!("task assistant handed a {:?} result", result.kind());
            return;
        };
        self.recent.push(result.title.clone());
        emit(MonitorEvent::TaskResult { payload: result });
    }
}
