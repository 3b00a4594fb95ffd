use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Assistant, AssistantKind};
use crate::capture::phash::looks_unchanged;
use crate::capture::CapturedFrame;
use crate::events::EventBus;
use crate::settings::AssistantSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Messages applied by a worker before it looks at its pending frame, so a
/// switch or clear always lands ahead of any frame distributed after it.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    AppSwitch(String),
    ClearPending,
    UpdateSettings(AssistantSettings),
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerTiming {
    pub poll: Duration,
    pub analysis_timeout: Duration,
}

/// Owner side of one assistant's task.
pub struct AssistantWorker {
    kind: AssistantKind,
    frames: watch::Sender<Option<Arc<CapturedFrame>>>,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl AssistantWorker {
    pub fn spawn(assistant: Box<dyn Assistant>, events: EventBus, timing: WorkerTiming) -> Self {
        let kind = assistant.kind();
        let (frames, frames_rx) = watch::channel(None);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let join = tokio::spawn(run_worker(
            assistant,
            frames_rx,
            commands_rx,
            events,
            cancel.clone(),
            timing,
        ));

        Self {
            kind,
            frames,
            commands,
            cancel,
            join: Some(join),
        }
    }

    pub fn kind(&self) -> AssistantKind {
        self.kind
    }

    /// Overwrites the pending slot. An unconsumed earlier frame is dropped.
    pub fn submit(&self, frame: Arc<CapturedFrame>) {
        self.frames.send_replace(Some(frame));
    }

    pub fn app_switch(&self, app: &str) {
        self.send(WorkerCommand::AppSwitch(app.to_string()));
    }

    pub fn clear_pending(&self) {
        self.frames.send_replace(None);
        self.send(WorkerCommand::ClearPending);
    }

    pub fn update_settings(&self, settings: AssistantSettings) {
        self.send(WorkerCommand::UpdateSettings(settings));
    }

    /// Cancels the loop and drops any pending frame. Returns the task handle
    /// the first time; later calls are no-ops.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.frames.send_replace(None);
        self.cancel.cancel();
        self.join.take()
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            log_debug!("{} worker already gone; command dropped", self.kind.as_str());
        }
    }
}

impl Drop for AssistantWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    mut assistant: Box<dyn Assistant>,
    mut frames: watch::Receiver<Option<Arc<CapturedFrame>>>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: EventBus,
    cancel: CancellationToken,
    timing: WorkerTiming,
) {
    let name = assistant.identifier();
    let mut ticker = time::interval(timing.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_analysis: Option<Instant> = None;
    let mut last_phash: Option<String> = None;

    log_info!("{} worker started", name);

    'poll: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        while let Ok(command) = commands.try_recv() {
            match command {
                WorkerCommand::AppSwitch(app) => assistant.on_app_switch(&app),
                WorkerCommand::ClearPending => {
                    last_phash = None;
                    assistant.clear_pending_work();
                }
                WorkerCommand::UpdateSettings(settings) => assistant.update_settings(settings),
            }
        }

        match frames.has_changed() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => break,
        }

        let pending = frames.borrow().as_ref().map(|frame| frame.frame_number);
        let Some(pending_number) = pending else {
            frames.borrow_and_update();
            continue;
        };

        if !assistant.is_enabled() {
            frames.borrow_and_update();
            continue;
        }
        if !assistant.should_analyze(pending_number, last_analysis.map(|at| at.elapsed())) {
            // Leave the frame in the slot; a newer one may replace it first.
            continue;
        }

        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };

        if assistant.settings().skip_unchanged_frames
            && looks_unchanged(last_phash.as_deref(), frame.phash.as_deref())
        {
            log_debug!("{} skipping unchanged frame #{}", name, frame.frame_number);
            continue;
        }

        last_analysis = Some(Instant::now());
        last_phash = frame.phash.clone();

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'poll,
            outcome = time::timeout(timing.analysis_timeout, assistant.analyze(&frame)) => outcome,
        };

        let result = match outcome {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => {
                log_debug!(
                    "{} found nothing in frame #{} ({}ms)",
                    name,
                    frame.frame_number,
                    started.elapsed().as_millis()
                );
                continue;
            }
            Ok(Err(err)) => {
                log_warn!("{} analysis of frame #{} failed: {err:#}", name, frame.frame_number);
                continue;
            }
            Err(_) => {
                log_warn!(
                    "{} analysis of frame #{} timed out after {:?}",
                    name,
                    frame.frame_number,
                    timing.analysis_timeout
                );
                continue;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        let threshold = assistant.settings().confidence_threshold;
        if result.confidence() < threshold {
            log_info!(
                "{} discarding result below confidence {:.2}: {:.2}",
                name,
                threshold,
                result.confidence()
            );
            continue;
        }

        assistant.handle_result(result, &mut |event| events.emit(event));
    }

    assistant.stop();
    log_info!("{} worker stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::test_support::frame;
    use crate::assistants::{AssistantResult, TaskPriority, TaskResult};
    use crate::events::MonitorEvent;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        analyzed: Vec<u64>,
        cleared: usize,
        switches: Vec<String>,
        stopped: usize,
    }

    struct Recorder {
        journal: Arc<Mutex<Journal>>,
        settings: AssistantSettings,
        confidence: f64,
        fail: bool,
        delay: Duration,
    }

    impl Recorder {
        fn new(journal: Arc<Mutex<Journal>>) -> Self {
            Self {
                journal,
                settings: AssistantSettings {
                    min_interval_secs: 0,
                    confidence_threshold: 0.5,
                    skip_unchanged_frames: false,
                    ..AssistantSettings::default()
                },
                confidence: 0.9,
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Assistant for Recorder {
        fn kind(&self) -> AssistantKind {
            AssistantKind::Task
        }

        fn settings(&self) -> &AssistantSettings {
            &self.settings
        }

        fn update_settings(&mut self, settings: AssistantSettings) {
            self.settings = settings;
        }

        async fn analyze(&mut self, frame: &CapturedFrame) -> Result<Option<AssistantResult>> {
            time::sleep(self.delay).await;
            self.journal.lock().unwrap().analyzed.push(frame.frame_number);
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(Some(AssistantResult::Task(TaskResult {
                title: format!("task from #{}", frame.frame_number),
                description: String::new(),
                priority: TaskPriority::Low,
                tags: Vec::new(),
                context_summary: String::new(),
                source_app: frame.app_name.clone(),
                confidence: self.confidence,
            })))
        }

        fn handle_result(&mut self, result: AssistantResult, emit: &mut dyn FnMut(MonitorEvent)) {
            if let AssistantResult::Task(payload) = result {
                emit(MonitorEvent::TaskResult { payload });
            }
        }

        fn on_app_switch(&mut self, new_app: &str) {
            self.journal.lock().unwrap().switches.push(new_app.to_string());
        }

        fn clear_pending_work(&mut self) {
            self.journal.lock().unwrap().cleared += 1;
        }

        fn stop(&mut self) {
            self.journal.lock().unwrap().stopped += 1;
        }
    }

    fn timing() -> WorkerTiming {
        WorkerTiming {
            poll: Duration::from_millis(100),
            analysis_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_frame_overwrites_unconsumed_first() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let worker = AssistantWorker::spawn(Box::new(Recorder::new(journal.clone())), bus, timing());

        worker.submit(Arc::new(frame(1, "Mail")));
        worker.submit(Arc::new(frame(2, "Mail")));
        time::sleep(Duration::from_millis(350)).await;

        assert_eq!(journal.lock().unwrap().analyzed, vec![2]);
        match rx.try_recv().unwrap() {
            MonitorEvent::TaskResult { payload } => assert_eq!(payload.title, "task from #2"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_lands_before_a_later_frame() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let worker =
            AssistantWorker::spawn(Box::new(Recorder::new(journal.clone())), EventBus::new(), timing());

        worker.submit(Arc::new(frame(1, "Mail")));
        worker.app_switch("Slack");
        worker.clear_pending();
        time::sleep(Duration::from_millis(250)).await;
        {
            let journal = journal.lock().unwrap();
            assert!(journal.analyzed.is_empty(), "cleared frame must not be analyzed");
            assert_eq!(journal.cleared, 1);
            assert_eq!(journal.switches, vec!["Slack".to_string()]);
        }

        worker.submit(Arc::new(frame(2, "Slack")));
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(journal.lock().unwrap().analyzed, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn low_confidence_results_never_reach_the_bus() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut recorder = Recorder::new(journal.clone());
        recorder.confidence = 0.2;
        let _worker = {
            let worker = AssistantWorker::spawn(Box::new(recorder), bus, timing());
            worker.submit(Arc::new(frame(1, "Mail")));
            worker
        };
        time::sleep(Duration::from_millis(250)).await;

        assert_eq!(journal.lock().unwrap().analyzed, vec![1]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_keeps_the_worker_alive() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut recorder = Recorder::new(journal.clone());
        recorder.fail = true;
        let worker = AssistantWorker::spawn(Box::new(recorder), EventBus::new(), timing());

        worker.submit(Arc::new(frame(1, "Mail")));
        time::sleep(Duration::from_millis(250)).await;
        worker.submit(Arc::new(frame(2, "Mail")));
        time::sleep(Duration::from_millis(250)).await;

        assert_eq!(journal.lock().unwrap().analyzed, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_holds_the_frame_until_due() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut recorder = Recorder::new(journal.clone());
        recorder.settings.min_interval_secs = 2;
        let worker = AssistantWorker::spawn(Box::new(recorder), EventBus::new(), timing());

        worker.submit(Arc::new(frame(1, "Mail")));
        time::sleep(Duration::from_millis(150)).await;
        worker.submit(Arc::new(frame(2, "Mail")));
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(journal.lock().unwrap().analyzed, vec![1]);

        time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(journal.lock().unwrap().analyzed, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_result_and_is_idempotent() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut recorder = Recorder::new(journal.clone());
        recorder.delay = Duration::from_secs(2);
        let mut worker = AssistantWorker::spawn(Box::new(recorder), bus, timing());

        worker.submit(Arc::new(frame(1, "Mail")));
        time::sleep(Duration::from_millis(500)).await;

        let join = worker.stop().expect("first stop hands back the task");
        join.await.unwrap();
        assert!(worker.stop().is_none());

        time::sleep(Duration::from_secs(3)).await;
        let journal = journal.lock().unwrap();
        assert!(journal.analyzed.is_empty());
        assert_eq!(journal.stopped, 1);
        assert!(rx.try_recv().is_err());
    }
}
