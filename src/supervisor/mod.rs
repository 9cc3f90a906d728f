//! Launch supervision: spawn an app, watch the process table for it, and
//! hand the launcher back exactly once when it is gone.
//!
//! A `Supervisor` is owned by a single task (see `orchestrator`). Per-session
//! helper tasks never touch its state directly; they report back through
//! [`poller::Feedback`] messages tagged with the session id, and anything
//! tagged with an id other than the active session's is dropped.

pub(crate) mod poller;
pub mod process;
pub mod reconcile;
pub mod session;

use crate::model::{
    CancelReason, LaunchRequest, Outcome, SessionId, Severity, SupervisorConfig, SupervisorEvent,
};
use poller::{Feedback, PollParams};
use process::{ProcessSpawner, ProcessTable};
use reconcile::{Reconciler, UiSurface};
use session::{LaunchSession, SessionPhase, Thresholds};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid launch request for '{target}': {reason}")]
    InvalidRequest { target: String, reason: &'static str },
}

/// Session plus the handles that keep it alive.
struct Tracked {
    session: LaunchSession,
    cancel: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl Tracked {
    /// Stop every task tied to this session. Safe to call repeatedly.
    fn disarm(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(h) = self.poller.take() {
            h.abort();
        }
        if let Some(h) = self.watcher.take() {
            h.abort();
        }
    }
}

enum Step {
    Nothing,
    Started,
    Finish,
    Cancel(CancelReason),
}

pub struct Supervisor<S, T, U> {
    cfg: SupervisorConfig,
    spawner: S,
    table: Arc<T>,
    reconciler: Reconciler<U>,
    event_tx: UnboundedSender<SupervisorEvent>,
    feedback_tx: UnboundedSender<Feedback>,
    /// Most recent session, kept after it ends so `terminate` can find it.
    current: Option<Tracked>,
    next_id: u64,
}

impl<S, T, U> Supervisor<S, T, U>
where
    S: ProcessSpawner,
    T: ProcessTable,
    U: UiSurface,
{
    pub(crate) fn new(
        cfg: SupervisorConfig,
        spawner: S,
        table: Arc<T>,
        surface: U,
        event_tx: UnboundedSender<SupervisorEvent>,
    ) -> (Self, UnboundedReceiver<Feedback>) {
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let sup = Self {
            cfg,
            spawner,
            table,
            reconciler: Reconciler::new(surface),
            event_tx,
            feedback_tx,
            current: None,
            next_id: 1,
        };
        (sup, feedback_rx)
    }

    /// The session currently being sampled, if any.
    pub fn active_session(&self) -> Option<&LaunchSession> {
        self.current
            .as_ref()
            .map(|t| &t.session)
            .filter(|s| s.is_active())
    }

    /// The most recent session regardless of state.
    pub fn last_session(&self) -> Option<&LaunchSession> {
        self.current.as_ref().map(|t| &t.session)
    }

    fn emit(&self, ev: SupervisorEvent) {
        let _ = self.event_tx.send(ev);
    }

    /// Start a new supervised session, cancelling any session still active.
    ///
    /// A spawn failure is not an error here: the session is concluded with
    /// [`Outcome::SpawnError`] and the launcher is restored right away.
    pub fn launch(&mut self, request: LaunchRequest) -> Result<SessionId, SupervisorError> {
        validate(&request)?;
        self.cancel_current(CancelReason::Superseded);

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let mut session = LaunchSession::new(id, request, Thresholds::from(&self.cfg));
        let target_id = session.request.target_id.clone();

        self.reconciler
            .surface_mut()
            .set_tile_loading(&target_id, true);
        tracing::info!(
            session = %id,
            target = %target_id,
            command = ?session.request.command,
            "launching"
        );

        let spawned = match self.spawner.spawn(&session.request.command) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::warn!(session = %id, target = %target_id, error = %e, "spawn failed");
                session.fail_spawn();
                self.current = Some(Tracked {
                    session,
                    cancel: Arc::new(AtomicBool::new(true)),
                    poller: None,
                    watcher: None,
                });
                self.finish();
                return Ok(id);
            }
        };

        self.emit(SupervisorEvent::SessionStarted {
            id,
            target_id: target_id.clone(),
            display_name: session.request.display_name.clone(),
            pid: spawned.pid,
        });

        let cancel = Arc::new(AtomicBool::new(false));
        let poller = tokio::spawn(poller::run_liveness_poller(PollParams {
            id,
            table: self.table.clone(),
            match_name: session.request.process_match_name.clone(),
            interval: self.cfg.poll_interval,
            query_timeout: self.cfg.query_timeout,
            ceiling: self.cfg.ceiling,
            feedback_tx: self.feedback_tx.clone(),
            cancel: cancel.clone(),
        }));
        let watcher = spawned.exit.map(|exit_rx| {
            let feedback_tx = self.feedback_tx.clone();
            tokio::spawn(async move {
                if let Ok(exit) = exit_rx.await {
                    let _ = feedback_tx.send(Feedback::ChildExited { id, exit });
                }
            })
        });

        self.current = Some(Tracked {
            session,
            cancel,
            poller: Some(poller),
            watcher,
        });
        Ok(id)
    }

    /// Apply a message from a session task. Messages for anything but the
    /// active session are stale and ignored.
    pub(crate) fn handle_feedback(&mut self, fb: Feedback) {
        let Some(tracked) = self.current.as_mut() else {
            tracing::debug!(session = %fb.session_id(), "feedback with no session");
            return;
        };
        if tracked.session.id != fb.session_id() || !tracked.session.is_active() {
            tracing::debug!(
                session = %fb.session_id(),
                current = %tracked.session.id,
                "discarding stale feedback"
            );
            return;
        }

        let id = tracked.session.id;
        let step = match fb {
            Feedback::Sample { sample, .. } => match tracked.session.observe(sample) {
                Some(Outcome::Started) => Step::Started,
                Some(_) => Step::Finish,
                None => Step::Nothing,
            },
            Feedback::ChildExited { exit, .. } => {
                if exit.success {
                    tracing::debug!(session = %id, "launcher process exited cleanly");
                    Step::Nothing
                } else if tracked.session.fail_spawn().is_some() {
                    tracing::warn!(
                        session = %id,
                        code = ?exit.code,
                        "launch command failed before the app was seen"
                    );
                    Step::Finish
                } else {
                    Step::Nothing
                }
            }
            Feedback::CeilingReached { .. } => Step::Cancel(CancelReason::Ceiling),
        };

        match step {
            Step::Nothing => {}
            Step::Started => {
                let target_id = tracked.session.request.target_id.clone();
                tracing::info!(session = %id, target = %target_id, "app is running");
                self.reconciler.started(&tracked.session.request);
                self.emit(SupervisorEvent::SessionRunning { id, target_id });
            }
            Step::Finish => self.finish(),
            Step::Cancel(reason) => {
                tracing::warn!(session = %id, "ceiling reached, no longer polling");
                self.cancel_current(reason);
            }
        }
    }

    /// Stop polling and run reconciliation for a decided session.
    fn finish(&mut self) {
        let Some(tracked) = self.current.as_mut() else {
            return;
        };
        tracked.disarm();
        let SessionPhase::Ending(outcome) = tracked.session.phase() else {
            return;
        };
        if !tracked.session.mark_concluded() {
            return;
        }
        let id = tracked.session.id;
        if self
            .reconciler
            .conclude(id, &tracked.session.request, outcome)
        {
            tracing::info!(session = %id, ?outcome, "session concluded");
            let _ = self.event_tx.send(SupervisorEvent::SessionConcluded {
                id,
                target_id: tracked.session.request.target_id.clone(),
                outcome,
            });
        }
    }

    /// Cancel the active session without reconciliation.
    pub fn cancel_current(&mut self, reason: CancelReason) -> Option<SessionId> {
        let tracked = self.current.as_mut()?;
        tracked.disarm();
        if !tracked.session.cancel(reason) {
            return None;
        }
        let id = tracked.session.id;
        let target_id = tracked.session.request.target_id.clone();
        tracing::info!(session = %id, target = %target_id, ?reason, "session cancelled");
        if !tracked.session.saw_running {
            self.reconciler
                .surface_mut()
                .set_tile_loading(&target_id, false);
        }
        self.emit(SupervisorEvent::SessionCancelled {
            id,
            target_id,
            reason,
        });
        Some(id)
    }

    /// The user went back to the launcher. The app keeps running unless
    /// `kill_on_return` is set.
    pub fn return_to_launcher(&mut self) -> Option<SessionId> {
        // After the ceiling the session is already cancelled but the app
        // may still be in front; only a concluded session is known gone.
        let app_may_be_up = self
            .last_session()
            .is_some_and(|s| !matches!(s.phase(), SessionPhase::Concluded(_)));
        let cancelled = self.cancel_current(CancelReason::User);
        if self.cfg.kill_on_return && app_may_be_up {
            self.terminate();
        }
        let surface = self.reconciler.surface_mut();
        surface.show_primary();
        cancelled
    }

    /// Ask every process matching the last launch to terminate. Independent
    /// of the session: an active session will see the app disappear and
    /// conclude normally.
    pub fn terminate(&mut self) -> bool {
        let Some(request) = self.last_session().map(|s| s.request.clone()) else {
            return false;
        };
        let fut = self.table.terminate_matching(&request.process_match_name);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match fut.await {
                Ok(n) => {
                    let _ = event_tx.send(SupervisorEvent::Info(format!(
                        "Terminated {n} {} process(es)",
                        request.process_match_name
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "terminate failed");
                    let _ = event_tx.send(SupervisorEvent::Notify {
                        message: format!("Could not stop {}", request.display_name),
                        severity: Severity::Error,
                    });
                }
            }
        });
        true
    }

    pub fn shutdown(&mut self) {
        if let Some(s) = self.active_session() {
            tracing::info!(session = %s.id, target = %s.request.target_id, "shutting down mid-session");
        }
        self.cancel_current(CancelReason::Shutdown);
    }
}

fn validate(request: &LaunchRequest) -> Result<(), SupervisorError> {
    let invalid = |reason| SupervisorError::InvalidRequest {
        target: request.target_id.clone(),
        reason,
    };
    if request.command.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(invalid("command is empty"));
    }
    if request.process_match_name.trim().is_empty() {
        return Err(invalid("process match name is empty"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::process::{ChildExit, ProcessSpawner, ProcessTable, QueryError, SpawnError, SpawnedProcess};
    use crate::model::{ProcessEntry, ProcessSnapshot};
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Step {
        Present,
        Absent,
        Fail,
        Hang,
    }

    /// Process table that plays back a script, then repeats `rest`.
    pub struct ScriptedTable {
        pub match_name: String,
        script: Mutex<VecDeque<Step>>,
        rest: Step,
        pub queries: Mutex<usize>,
        pub terminated: Mutex<Vec<String>>,
    }

    impl ScriptedTable {
        pub fn new(match_name: &str, script: &[Step], rest: Step) -> Arc<Self> {
            Arc::new(Self {
                match_name: match_name.to_string(),
                script: Mutex::new(script.iter().copied().collect()),
                rest,
                queries: Mutex::new(0),
                terminated: Mutex::new(Vec::new()),
            })
        }

        pub fn query_count(&self) -> usize {
            *self.queries.lock().unwrap()
        }
    }

    impl ProcessTable for ScriptedTable {
        fn snapshot(&self) -> BoxFuture<'static, Result<ProcessSnapshot, QueryError>> {
            *self.queries.lock().unwrap() += 1;
            let step = self.script.lock().unwrap().pop_front().unwrap_or(self.rest);
            let mut procs = vec![ProcessEntry {
                pid: 1,
                name: "init".into(),
            }];
            if step == Step::Present {
                procs.push(ProcessEntry {
                    pid: 4242,
                    name: self.match_name.to_uppercase(),
                });
            }
            Box::pin(async move {
                match step {
                    Step::Present | Step::Absent => Ok(procs),
                    Step::Fail => Err(QueryError::Failed("scripted failure".into())),
                    Step::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(procs)
                    }
                }
            })
        }

        fn terminate_matching(&self, match_name: &str) -> BoxFuture<'static, Result<usize, QueryError>> {
            self.terminated.lock().unwrap().push(match_name.to_string());
            Box::pin(async { Ok(1) })
        }
    }

    /// Spawner that records commands and optionally fails or hands out exit
    /// senders for the test to fire.
    #[derive(Clone, Default)]
    pub struct FakeSpawner {
        pub fail: bool,
        pub watch_exit: bool,
        pub spawned: Arc<Mutex<Vec<Vec<String>>>>,
        pub exits: Arc<Mutex<Vec<oneshot::Sender<ChildExit>>>>,
    }

    impl FakeSpawner {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }
    }

    impl ProcessSpawner for FakeSpawner {
        fn spawn(&self, command: &[String]) -> Result<SpawnedProcess, SpawnError> {
            if self.fail {
                return Err(SpawnError::Io {
                    program: command[0].clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            self.spawned.lock().unwrap().push(command.to_vec());
            let exit = if self.watch_exit {
                let (tx, rx) = oneshot::channel();
                self.exits.lock().unwrap().push(tx);
                Some(rx)
            } else {
                None
            };
            Ok(SpawnedProcess {
                pid: Some(1000 + self.spawn_count() as u32),
                exit,
            })
        }
    }
}
