use std::sync::Arc;

use tokio::task::JoinHandle;

use super::worker::{AssistantWorker, WorkerTiming};
use super::{Assistant, AssistantKind};
use crate::capture::CapturedFrame;
use crate::events::EventBus;
use crate::settings::AssistantsConfig;

/// Registry of running assistant workers.
///
/// Owned by the coordination context; every method returns immediately; the
/// analysis itself happens inside each worker's own task.
pub struct AssistantCoordinator {
    workers: Vec<AssistantWorker>,
    events: EventBus,
    timing: WorkerTiming,
}

impl AssistantCoordinator {
    pub fn new(events: EventBus, timing: WorkerTiming) -> Self {
        Self {
            workers: Vec::new(),
            events,
            timing,
        }
    }

    /// Spawns a worker for `assistant` unless one of the same kind is already
    /// registered. Returns whether it was added.
    pub fn register(&mut self, assistant: Box<dyn Assistant>) -> bool {
        let kind = assistant.kind();
        if self.workers.iter().any(|worker| worker.kind() == kind) {
            log::debug!("{} assistant already registered", kind.as_str());
            return false;
        }
        log::info!("registered {} assistant", assistant.display_name());
        self.workers
            .push(AssistantWorker::spawn(assistant, self.events.clone(), self.timing));
        true
    }

    pub fn distribute_frame(&self, frame: Arc<CapturedFrame>) {
        log::debug!(
            "distributing frame #{} ({}) to {} assistants",
            frame.frame_number,
            frame.app_name,
            self.workers.len()
        );
        for worker in &self.workers {
            worker.submit(Arc::clone(&frame));
        }
    }

    pub fn notify_app_switch(&self, new_app: &str) {
        for worker in &self.workers {
            worker.app_switch(new_app);
        }
    }

    pub fn clear_all_pending_work(&self) {
        for worker in &self.workers {
            worker.clear_pending();
        }
    }

    pub fn update_settings(&self, config: &AssistantsConfig) {
        for worker in &self.workers {
            worker.update_settings(config.for_kind(worker.kind()).clone());
        }
    }

    /// Cancels every worker and empties the registry. The caller may await
    /// the returned handles to know when each loop has exited.
    pub fn stop_all(&mut self) -> Vec<JoinHandle<()>> {
        self.workers
            .drain(..)
            .filter_map(|mut worker| worker.stop())
            .collect()
    }

    pub fn kinds(&self) -> Vec<AssistantKind> {
        self.workers.iter().map(|worker| worker.kind()).collect()
    }
}

impl Drop for AssistantCoordinator {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}
