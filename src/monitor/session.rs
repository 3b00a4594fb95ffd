use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    AlreadyRunning,
    /// Transitioned to `Starting` under this generation.
    Begin(u64),
}

/// `Stopped -> Starting -> Running -> Stopping -> Stopped`.
///
/// `generation` increments on every start so that messages from tasks
/// spawned for an earlier session can be recognised and dropped.
#[derive(Debug, Clone, Default)]
pub struct MonitoringSession {
    state: SessionState,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl MonitoringSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn begin_start(&mut self) -> Result<StartDecision> {
        match self.state {
            SessionState::Running => Ok(StartDecision::AlreadyRunning),
            SessionState::Starting => bail!("monitoring is already starting"),
            SessionState::Stopping => bail!("monitoring is still stopping"),
            SessionState::Stopped => {
                self.generation += 1;
                self.state = SessionState::Starting;
                self.session_id = Some(Uuid::new_v4().to_string());
                self.started_at = None;
                Ok(StartDecision::Begin(self.generation))
            }
        }
    }

    /// Completes a start. False if the start was aborted or superseded.
    pub fn mark_running(&mut self, generation: u64) -> bool {
        if self.state != SessionState::Starting || self.generation != generation {
            return false;
        }
        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// `Running -> Stopping`. False from any other state.
    pub fn begin_stop(&mut self) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.state = SessionState::Stopping;
        true
    }

    /// Settles in `Stopped`, handing back the finished session's id.
    pub fn mark_stopped(&mut self) -> Option<String> {
        self.state = SessionState::Stopped;
        self.started_at = None;
        self.session_id.take()
    }

    /// Drops a start that never reached `Running`.
    pub fn abort_start(&mut self) {
        if self.state == SessionState::Starting {
            self.state = SessionState::Stopped;
            self.session_id = None;
        }
    }
}
