//! Capture failure accounting and OS lifecycle bookkeeping.
//!
//! Pure state: the coordination context feeds it outcomes and lifecycle
//! signals and carries out the actions it returns.

use serde::Serialize;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub last_succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    /// The threshold was just reached; re-check capture permission.
    CheckPermission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionVerdict {
    /// Still granted: capture is transiently broken. Rebuild the source.
    ReinitializeSource,
    PermissionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockAction {
    /// Session survived the lock; rebuild the source and restart ticking.
    ResumeTicking,
    /// Session was running at lock time but has since stopped.
    RestartSession,
    Nothing,
}

#[derive(Debug)]
pub struct FailureRecovery {
    threshold: u32,
    state: FailureState,
    degraded: bool,
    check_pending: bool,
    running_before_sleep: bool,
    running_before_lock: bool,
    locked: bool,
}

impl FailureRecovery {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: FailureState::default(),
            degraded: false,
            check_pending: false,
            running_before_sleep: false,
            running_before_lock: false,
            locked: false,
        }
    }

    pub fn state(&self) -> FailureState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
    }

    /// Counts a failure. Escalates once when the count reaches the threshold,
    /// including a threshold lowered below a run already in progress. Nothing
    /// more until a granted check restarts the count.
    pub fn record_failure(&mut self) -> RecoveryAction {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.last_succeeded = false;

        if self.state.consecutive_failures >= self.threshold && !self.check_pending {
            self.degraded = true;
            self.check_pending = true;
            log_warn!(
                "{} consecutive capture failures; re-checking capture permission",
                self.threshold
            );
            return RecoveryAction::CheckPermission;
        }
        RecoveryAction::None
    }

    /// Resets the counter. Returns true if this ended a degraded stretch.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.degraded;
        if recovered {
            log_info!(
                "capture recovered after {} consecutive failures",
                self.state.consecutive_failures
            );
        }
        self.state = FailureState {
            consecutive_failures: 0,
            last_succeeded: true,
        };
        self.degraded = false;
        recovered
    }

    /// A denied verdict keeps escalation latched until `reset`.
    pub fn on_permission_checked(&mut self, granted: bool) -> PermissionVerdict {
        if granted {
            log_info!("capture permission still granted; reinitializing frame source");
            self.check_pending = false;
            self.reset_counter();
            PermissionVerdict::ReinitializeSource
        } else {
            log_warn!("capture permission lost");
            PermissionVerdict::PermissionLost
        }
    }

    pub fn will_sleep(&mut self, running: bool) {
        self.running_before_sleep = running;
    }

    /// Returns whether the frame source should be rebuilt.
    pub fn did_wake(&mut self) -> bool {
        self.reset_counter();
        std::mem::take(&mut self.running_before_sleep)
    }

    pub fn screen_locked(&mut self, running: bool) {
        self.locked = true;
        self.running_before_lock = running;
    }

    pub fn screen_unlocked(&mut self, running_now: bool) -> UnlockAction {
        self.locked = false;
        self.reset_counter();
        let was_running = std::mem::take(&mut self.running_before_lock);
        match (was_running, running_now) {
            (_, true) => UnlockAction::ResumeTicking,
            (true, false) => UnlockAction::RestartSession,
            (false, false) => UnlockAction::Nothing,
        }
    }

    /// Fresh start for a new session. Lock state is kept: the screen does not
    /// unlock because monitoring restarted.
    pub fn reset(&mut self) {
        self.reset_counter();
        self.check_pending = false;
    }

    fn reset_counter(&mut self) {
        self.state.consecutive_failures = 0;
        self.degraded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_counter_to_zero() {
        let mut recovery = FailureRecovery::new(5);
        for _ in 0..4 {
            assert_eq!(recovery.record_failure(), RecoveryAction::None);
        }
        assert_eq!(recovery.state().consecutive_failures, 4);

        assert!(!recovery.record_success());
        assert_eq!(
            recovery.state(),
            FailureState {
                consecutive_failures: 0,
                last_succeeded: true
            }
        );
    }

    #[test]
    fn escalates_exactly_once_at_threshold() {
        let mut recovery = FailureRecovery::new(5);
        let actions: Vec<_> = (0..9).map(|_| recovery.record_failure()).collect();
        let checks = actions
            .iter()
            .filter(|action| **action == RecoveryAction::CheckPermission)
            .count();
        assert_eq!(checks, 1);
        assert_eq!(actions[4], RecoveryAction::CheckPermission);
    }

    #[test]
    fn granted_permission_restarts_the_count() {
        let mut recovery = FailureRecovery::new(3);
        for _ in 0..3 {
            recovery.record_failure();
        }
        assert_eq!(
            recovery.on_permission_checked(true),
            PermissionVerdict::ReinitializeSource
        );
        assert_eq!(recovery.state().consecutive_failures, 0);

        // A fresh run of failures can escalate again.
        for _ in 0..2 {
            assert_eq!(recovery.record_failure(), RecoveryAction::None);
        }
        assert_eq!(recovery.record_failure(), RecoveryAction::CheckPermission);
    }

    #[test]
    fn denied_permission_is_reported() {
        let mut recovery = FailureRecovery::new(1);
        assert_eq!(recovery.record_failure(), RecoveryAction::CheckPermission);
        assert_eq!(
            recovery.on_permission_checked(false),
            PermissionVerdict::PermissionLost
        );
        assert_eq!(recovery.record_failure(), RecoveryAction::None);

        recovery.reset();
        assert_eq!(recovery.record_failure(), RecoveryAction::CheckPermission);
    }

    #[test]
    fn lowering_threshold_mid_run_still_escalates_once() {
        let mut recovery = FailureRecovery::new(5);
        for _ in 0..4 {
            assert_eq!(recovery.record_failure(), RecoveryAction::None);
        }
        recovery.set_threshold(3);

        let checks = (0..50)
            .map(|_| recovery.record_failure())
            .filter(|action| *action == RecoveryAction::CheckPermission)
            .count();
        assert_eq!(checks, 1);
        assert_eq!(recovery.state().consecutive_failures, 54);
    }

    #[test]
    fn success_after_degradation_reports_recovery() {
        let mut recovery = FailureRecovery::new(2);
        recovery.record_failure();
        recovery.record_failure();
        assert!(recovery.record_success());
        assert!(!recovery.record_success());
    }

    #[test]
    fn wake_reinitializes_only_if_running_at_sleep() {
        let mut recovery = FailureRecovery::new(5);
        recovery.will_sleep(true);
        recovery.record_failure();
        assert!(recovery.did_wake());
        assert_eq!(recovery.state().consecutive_failures, 0);

        recovery.will_sleep(false);
        assert!(!recovery.did_wake());
    }

    #[test]
    fn unlock_picks_resume_or_restart() {
        let mut recovery = FailureRecovery::new(5);

        recovery.screen_locked(true);
        assert!(recovery.is_locked());
        assert_eq!(recovery.screen_unlocked(true), UnlockAction::ResumeTicking);
        assert!(!recovery.is_locked());

        recovery.screen_locked(true);
        assert_eq!(recovery.screen_unlocked(false), UnlockAction::RestartSession);

        recovery.screen_locked(false);
        assert_eq!(recovery.screen_unlocked(false), UnlockAction::Nothing);
    }
}
