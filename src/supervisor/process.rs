//! OS collaborators: process creation and process-table queries.
//!
//! The supervisor only sees the two traits; the sysinfo/tokio implementations
//! below are what the binary wires in.

use crate::model::{ProcessEntry, ProcessSnapshot};
use futures::future::BoxFuture;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("launch command is empty")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("process table query timed out")]
    Timeout,
    #[error("process table query failed: {0}")]
    Failed(String),
}

/// Exit of the directly spawned child (not necessarily the target app).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub success: bool,
}

pub struct SpawnedProcess {
    pub pid: Option<u32>,
    /// Resolves when the direct child exits. `None` if it is not watched.
    pub exit: Option<oneshot::Receiver<ChildExit>>,
}

pub trait ProcessSpawner: Send {
    fn spawn(&self, command: &[String]) -> Result<SpawnedProcess, SpawnError>;
}

pub trait ProcessTable: Send + Sync + 'static {
    fn snapshot(&self) -> BoxFuture<'static, Result<ProcessSnapshot, QueryError>>;

    /// Send SIGTERM to every process whose name matches. Returns how many
    /// processes were signalled.
    fn terminate_matching(&self, match_name: &str) -> BoxFuture<'static, Result<usize, QueryError>>;
}

/// Case-insensitive substring match used for process names.
pub fn name_matches(name: &str, match_name: &str) -> bool {
    if match_name.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&match_name.to_lowercase())
}

pub fn snapshot_matches(snapshot: &[ProcessEntry], match_name: &str) -> bool {
    snapshot.iter().any(|p| name_matches(&p.name, match_name))
}

/// Spawns children in their own process group with null stdio, so neither
/// side's exit takes the other down. The direct child is reaped by a
/// background task.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSpawner;

impl ProcessSpawner for DetachedSpawner {
    fn spawn(&self, command: &[String]) -> Result<SpawnedProcess, SpawnError> {
        let (program, args) = command.split_first().ok_or(SpawnError::EmptyCommand)?;

        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(false);
        let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (exit_tx, exit_rx) = oneshot::channel();
        let program = program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!(%program, ?pid, %status, "direct child exited");
                    let _ = exit_tx.send(ChildExit {
                        code: status.code(),
                        success: status.success(),
                    });
                }
                Err(e) => tracing::warn!(%program, ?pid, error = %e, "waiting on child failed"),
            }
        });

        Ok(SpawnedProcess {
            pid,
            exit: Some(exit_rx),
        })
    }
}

/// Process table backed by sysinfo. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SysinfoProcessTable {
    sys: Arc<Mutex<System>>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

fn refresh(sys: &mut System) {
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
}

fn is_live(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

async fn with_system<F, R>(sys: Arc<Mutex<System>>, f: F) -> Result<R, QueryError>
where
    F: FnOnce(&mut System) -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = sys
            .lock()
            .map_err(|_| QueryError::Failed("process table lock poisoned".into()))?;
        refresh(&mut guard);
        Ok(f(&mut guard))
    })
    .await
    .map_err(|e| QueryError::Failed(format!("query task failed: {e}")))?
}

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> BoxFuture<'static, Result<ProcessSnapshot, QueryError>> {
        let sys = self.sys.clone();
        Box::pin(with_system(sys, |sys| {
            let mut entries: ProcessSnapshot = sys
                .processes()
                .iter()
                .filter(|(_, p)| is_live(p.status()))
                .map(|(pid, p)| ProcessEntry {
                    pid: pid.as_u32(),
                    name: p.name().to_string_lossy().into_owned(),
                })
                .collect();
            entries.sort_by_key(|e| e.pid);
            entries
        }))
    }

    fn terminate_matching(&self, match_name: &str) -> BoxFuture<'static, Result<usize, QueryError>> {
        let sys = self.sys.clone();
        let match_name = match_name.to_string();
        let own_pid = std::process::id();
        Box::pin(with_system(sys, move |sys| {
            let mut signalled = 0;
            for (pid, process) in sys.processes() {
                if pid.as_u32() == own_pid || !is_live(process.status()) {
                    continue;
                }
                if !name_matches(&process.name().to_string_lossy(), &match_name) {
                    continue;
                }
                let sent = process
                    .kill_with(Signal::Term)
                    .unwrap_or_else(|| process.kill());
                if sent {
                    tracing::info!(pid = pid.as_u32(), name = %match_name, "sent terminate");
                    signalled += 1;
                }
            }
            signalled
        }))
    }
}
