pub mod advice;
pub mod coordinator;
pub mod focus;
pub mod memory;
pub mod recent;
pub mod task;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisBackend, AnalysisImage, AnalysisRequest};
use crate::capture::CapturedFrame;
use crate::events::MonitorEvent;
use crate::settings::{AssistantSettings, MonitorConfig};

pub use advice::{AdviceAssistant, AdviceCategory, AdviceResult};
pub use coordinator::AssistantCoordinator;
pub use focus::{FocusAssistant, FocusResult, FocusStatus};
pub use memory::{MemoryAssistant, MemoryCategory, MemoryResult};
pub use task::{TaskAssistant, TaskPriority, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssistantKind {
    Focus,
    Task,
    Advice,
    Memory,
}

impl AssistantKind {
    pub const ALL: [AssistantKind; 4] = [
        AssistantKind::Focus,
        AssistantKind::Task,
        AssistantKind::Advice,
        AssistantKind::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantKind::Focus => "focus",
            AssistantKind::Task => "task",
            AssistantKind::Advice => "advice",
            AssistantKind::Memory => "memory",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AssistantKind::Focus => "Focus",
            AssistantKind::Task => "Tasks",
            AssistantKind::Advice => "Advice",
            AssistantKind::Memory => "Memories",
        }
    }
}

/// What an analysis produced, tagged by the assistant that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantResult {
    Focus(FocusResult),
    Task(TaskResult),
    Advice(AdviceResult),
    Memory(Vec<MemoryResult>),
}

impl AssistantResult {
    pub fn kind(&self) -> AssistantKind {
        match self {
            AssistantResult::Focus(_) => AssistantKind::Focus,
            AssistantResult::Task(_) => AssistantKind::Task,
            AssistantResult::Advice(_) => AssistantKind::Advice,
            AssistantResult::Memory(_) => AssistantKind::Memory,
        }
    }

    /// A memory batch scores as its most confident entry.
    pub fn confidence(&self) -> f64 {
        match self {
            AssistantResult::Focus(result) => result.confidence,
            AssistantResult::Task(result) => result.confidence,
            AssistantResult::Advice(result) => result.confidence,
            AssistantResult::Memory(results) => results
                .iter()
                .map(|memory| memory.confidence)
                .fold(0.0, f64::max),
        }
    }
}

/// An analysis worker. Each instance runs inside its own task (see
/// `worker::AssistantWorker`) and is never shared, so `&mut self` is all the
/// synchronisation it needs.
#[async_trait]
pub trait Assistant: Send {
    fn kind(&self) -> AssistantKind;

    fn identifier(&self) -> &'static str {
        self.kind().as_str()
    }

    fn display_name(&self) -> &'static str {
        self.kind().display_name()
    }

    fn settings(&self) -> &AssistantSettings;

    fn update_settings(&mut self, settings: AssistantSettings);

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    /// Gate checked before consuming the pending frame. `since_last` is
    /// `None` until the first analysis.
    fn should_analyze(&self, _frame_number: u64, since_last: Option<Duration>) -> bool {
        since_last.map_or(true, |elapsed| elapsed >= self.settings().min_interval())
    }

    async fn analyze(&mut self, frame: &CapturedFrame) -> Result<Option<AssistantResult>>;

    /// Turns a result that passed the confidence gate into events.
    fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent));

    fn on_app_switch(&mut self, _new_app: &str) {}

    fn clear_pending_work(&mut self) {}

    fn stop(&mut self) {}
}

pub type AssistantFactory =
    Arc<dyn Fn(&MonitorConfig) -> Vec<Box<dyn Assistant>> + Send + Sync>;

/// Factory building the four stock assistants over one analysis backend.
pub fn default_assistants(backend: Arc<dyn AnalysisBackend>) -> AssistantFactory {
    Arc::new(move |config: &MonitorConfig| {
        let assistants = &config.assistants;
        vec![
            Box::new(FocusAssistant::new(
                Arc::clone(&backend),
                assistants.focus.clone(),
                Duration::from_secs(assistants.distraction_alert_cooldown_secs),
            )) as Box<dyn Assistant>,
            Box::new(TaskAssistant::new(Arc::clone(&backend), assistants.task.clone())),
            Box::new(AdviceAssistant::new(Arc::clone(&backend), assistants.advice.clone())),
            Box::new(MemoryAssistant::new(Arc::clone(&backend), assistants.memory.clone())),
        ]
    })
}

/// Sends `frame` with a prompt and response schema to the backend and decodes
/// the structured reply.
async fn ask_about_frame<T: DeserializeOwned>(
    backend: &dyn AnalysisBackend,
    kind: AssistantKind,
    system_prompt: &str,
    prompt: String,
    frame: &CapturedFrame,
    schema: serde_json::Value,
) -> Result<T> {
    let request = AnalysisRequest {
        system_prompt: system_prompt.to_string(),
        prompt,
        image: Some(AnalysisImage {
            data: frame.image.clone(),
            mime_type: frame.mime_type,
        }),
        schema,
    };
    let value = backend.generate(request).await?;
    serde_json::from_value(value)
        .with_context(|| format!("{} response did not match schema", kind.as_str()))
}

fn frame_context(frame: &CapturedFrame) -> String {
    match &frame.window_title {
        Some(title) if !title.is_empty() => {
            format!("Active app: {}\nWindow title: {}", frame.app_name, title)
        }
        _ => format!("Active app: {}", frame.app_name),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Backend returning a fixed response and recording every request.
    pub struct ScriptedBackend {
        pub response: Mutex<Result<serde_json::Value, String>>,
        pub requests: Mutex<Vec<AnalysisRequest>>,
    }

    impl ScriptedBackend {
        pub fn ok(value: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Ok(value)),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Err(message.to_string())),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn respond_with(&self, value: serde_json::Value) {
            *self.response.lock().unwrap() = Ok(value);
        }

        pub fn last_prompt(&self) -> String {
            self.requests.lock().unwrap().last().unwrap().prompt.clone()
        }
    }

    #[async_trait]
    impl AnalysisBackend for ScriptedBackend {
        async fn generate(&self, request: AnalysisRequest) -> Result<serde_json::Value> {
            self.requests.lock().unwrap().push(request);
            self.response
                .lock()
                .unwrap()
                .clone()
                .map_err(|message| anyhow::anyhow!(message))
        }
    }

    pub fn frame(frame_number: u64, app: &str) -> CapturedFrame {
        CapturedFrame {
            image: Bytes::from_static(b"jpeg"),
            mime_type: "image/jpeg",
            width: 4,
            height: 4,
            app_name: app.to_string(),
            window_title: Some(format!("{app} window")),
            frame_number,
            captured_at: Utc::now(),
            phash: None,
        }
    }

    pub fn collect(assistant: &mut dyn Assistant, result: AssistantResult) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        assistant.handle_result(result, &mut |event| events.push(event));
        events
    }
}
