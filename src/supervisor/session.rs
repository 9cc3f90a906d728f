//! Per-session lifecycle state machine.
//!
//! Pure bookkeeping: the poller feeds samples in, the supervisor acts on the
//! outcomes that come back. Nothing here touches the OS or the UI.

use crate::model::{CancelReason, LaunchRequest, Outcome, SessionId, SupervisorConfig};

/// Result of a single process-table probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Match,
    NoMatch,
    /// The query failed or timed out. Counts as a missed sample.
    QueryFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingStart,
    Running,
    /// Outcome decided and sampling stopped; reconciliation pending.
    Ending(Outcome),
    Concluded(Outcome),
    Cancelled(CancelReason),
}

/// Debounce thresholds, copied out of the config once per session.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub startup_ticks: u32,
    pub debounce_ticks: u32,
    pub query_failure_limit: u32,
}

impl From<&SupervisorConfig> for Thresholds {
    fn from(cfg: &SupervisorConfig) -> Self {
        Self {
            startup_ticks: cfg.startup_ticks.max(1),
            debounce_ticks: cfg.debounce_ticks.max(1),
            query_failure_limit: cfg.query_failure_limit.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchSession {
    pub id: SessionId,
    pub request: LaunchRequest,
    pub cancelled: bool,
    pub saw_running: bool,
    pub consecutive_not_running: u32,
    pub consecutive_query_failures: u32,
    pub ticks: u64,
    phase: SessionPhase,
    thresholds: Thresholds,
}

impl LaunchSession {
    pub fn new(id: SessionId, request: LaunchRequest, thresholds: Thresholds) -> Self {
        Self {
            id,
            request,
            cancelled: false,
            saw_running: false,
            consecutive_not_running: 0,
            consecutive_query_failures: 0,
            ticks: 0,
            phase: SessionPhase::AwaitingStart,
            thresholds,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Still sampling: neither decided, concluded nor cancelled.
    pub fn is_active(&self) -> bool {
        !self.cancelled
            && matches!(
                self.phase,
                SessionPhase::AwaitingStart | SessionPhase::Running
            )
    }

    /// Apply one poll sample. Returns the outcome if this sample changed the
    /// session's lifecycle (start observed, or a terminal decision).
    pub fn observe(&mut self, sample: Sample) -> Option<Outcome> {
        if !self.is_active() {
            return None;
        }
        self.ticks += 1;

        if sample == Sample::QueryFailed {
            self.consecutive_query_failures += 1;
        } else {
            self.consecutive_query_failures = 0;
        }
        let too_many_failures =
            self.consecutive_query_failures >= self.thresholds.query_failure_limit;

        match (self.phase, sample == Sample::Match) {
            (SessionPhase::AwaitingStart, true) => {
                self.phase = SessionPhase::Running;
                self.saw_running = true;
                self.consecutive_not_running = 0;
                Some(Outcome::Started)
            }
            (SessionPhase::AwaitingStart, false) => {
                self.consecutive_not_running += 1;
                if self.consecutive_not_running >= self.thresholds.startup_ticks
                    || too_many_failures
                {
                    self.phase = SessionPhase::Ending(Outcome::StartupTimeout);
                    Some(Outcome::StartupTimeout)
                } else {
                    None
                }
            }
            (SessionPhase::Running, true) => {
                self.consecutive_not_running = 0;
                None
            }
            (SessionPhase::Running, false) => {
                self.consecutive_not_running += 1;
                if self.consecutive_not_running >= self.thresholds.debounce_ticks
                    || too_many_failures
                {
                    self.phase = SessionPhase::Ending(Outcome::Ended);
                    Some(Outcome::Ended)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The launch itself failed. Only honoured before the app was seen.
    pub fn fail_spawn(&mut self) -> Option<Outcome> {
        if !self.is_active() || self.saw_running {
            return None;
        }
        self.phase = SessionPhase::Ending(Outcome::SpawnError);
        Some(Outcome::SpawnError)
    }

    /// Move a decided session to its final state. Returns false when there
    /// was nothing pending, which makes reconciliation idempotent.
    pub fn mark_concluded(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        match self.phase {
            SessionPhase::Ending(outcome) => {
                self.phase = SessionPhase::Concluded(outcome);
                true
            }
            _ => false,
        }
    }

    /// Returns false if the session was already concluded or cancelled.
    pub fn cancel(&mut self, reason: CancelReason) -> bool {
        match self.phase {
            SessionPhase::Concluded(_) | SessionPhase::Cancelled(_) => false,
            _ => {
                self.cancelled = true;
                self.phase = SessionPhase::Cancelled(reason);
                true
            }
        }
    }
}
