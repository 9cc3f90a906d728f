use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timing and debounce policy for supervised sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    /// Samples without a match before a launch is declared failed.
    pub startup_ticks: u32,
    /// Consecutive missed samples before a running app is declared ended.
    pub debounce_ticks: u32,
    /// Consecutive failed process-table queries tolerated.
    pub query_failure_limit: u32,
    #[serde(with = "humantime_serde")]
    pub ceiling: Duration,
    #[serde(default)]
    pub kill_on_return: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            query_timeout: Duration::from_secs(1),
            startup_ticks: 10,
            debounce_ticks: 2,
            query_failure_limit: 3,
            ceiling: Duration::from_secs(40 * 60),
            kill_on_return: false,
        }
    }
}

/// What to run for a tile and how to recognise it in the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub target_id: String,
    /// Human-readable name used in notifications.
    pub display_name: String,
    pub command: Vec<String>,
    pub process_match_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle notifications handed to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Target observed in the process table. Not terminal.
    Started,
    /// Target was running and then disappeared.
    Ended,
    /// Target never showed up in the process table.
    StartupTimeout,
    /// The process could not be created, or its launcher exited with failure.
    SpawnError,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::Started)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::StartupTimeout | Outcome::SpawnError)
    }
}

/// Why a session stopped without reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The user went back to the launcher.
    User,
    /// A newer launch replaced this session.
    Superseded,
    /// The hard ceiling timer fired.
    Ceiling,
    /// The supervisor is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Error,
}

/// One entry of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

pub type ProcessSnapshot = Vec<ProcessEntry>;

/// Events emitted by the supervisor and consumed by UI/CLI layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SupervisorEvent {
    ShowPrimary,
    TileLoading {
        tile_id: String,
        loading: bool,
    },
    Notify {
        message: String,
        severity: Severity,
    },
    SessionStarted {
        id: SessionId,
        target_id: String,
        display_name: String,
        pid: Option<u32>,
    },
    SessionRunning {
        id: SessionId,
        target_id: String,
    },
    SessionConcluded {
        id: SessionId,
        target_id: String,
        outcome: Outcome,
    },
    SessionCancelled {
        id: SessionId,
        target_id: String,
        reason: CancelReason,
    },
    Info(String),
}

impl SupervisorEvent {
    /// Render a human-readable line for text mode.
    pub fn to_message(&self) -> String {
        match self {
            SupervisorEvent::ShowPrimary => "Launcher shown".to_string(),
            SupervisorEvent::TileLoading { tile_id, loading } => {
                if *loading {
                    format!("{tile_id}: loading")
                } else {
                    format!("{tile_id}: idle")
                }
            }
            SupervisorEvent::Notify { message, severity } => match severity {
                Severity::Info => message.clone(),
                Severity::Error => format!("Error: {message}"),
            },
            SupervisorEvent::SessionStarted {
                id,
                display_name,
                pid,
                ..
            } => match pid {
                Some(pid) => format!("Session {id}: launched {display_name} (pid {pid})"),
                None => format!("Session {id}: launched {display_name}"),
            },
            SupervisorEvent::SessionRunning { id, target_id } => {
                format!("Session {id}: {target_id} is running")
            }
            SupervisorEvent::SessionConcluded {
                id,
                target_id,
                outcome,
            } => format!("Session {id}: {target_id} concluded ({outcome:?})"),
            SupervisorEvent::SessionCancelled {
                id,
                target_id,
                reason,
            } => format!("Session {id}: {target_id} cancelled ({reason:?})"),
            SupervisorEvent::Info(msg) => msg.clone(),
        }
    }
}
