//! Supervisor event loop.
//!
//! Owns the `Supervisor` for its whole life, so all session state is mutated
//! from this one task.

use crate::catalog::Catalog;
use crate::model::{Severity, SupervisorEvent};
use crate::supervisor::poller::Feedback;
use crate::supervisor::process::{ProcessSpawner, ProcessTable};
use crate::supervisor::reconcile::UiSurface;
use crate::supervisor::Supervisor;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiCommand {
    /// Launch the tile with this id.
    Launch(String),
    /// Back to the launcher; cancels the active session.
    ReturnToLauncher,
    /// Stop the app of the most recent session.
    Terminate,
    Quit,
}

/// Run until `Quit` is received or every command sender is gone.
pub(crate) async fn run_controller<S, T, U>(
    catalog: &Catalog,
    mut supervisor: Supervisor<S, T, U>,
    mut feedback_rx: UnboundedReceiver<Feedback>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    event_tx: UnboundedSender<SupervisorEvent>,
) -> Result<()>
where
    S: ProcessSpawner,
    T: ProcessTable,
    U: UiSurface,
{
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Launch(tile_id)) => {
                        let launched = catalog
                            .request_for(&tile_id)
                            .map_err(anyhow::Error::from)
                            .and_then(|req| supervisor.launch(req).map_err(anyhow::Error::from));
                        if let Err(e) = launched {
                            tracing::warn!(tile = %tile_id, error = %e, "launch rejected");
                            let _ = event_tx.send(SupervisorEvent::Notify {
                                message: format!("{e}"),
                                severity: Severity::Error,
                            });
                        }
                    }
                    Some(UiCommand::ReturnToLauncher) => {
                        supervisor.return_to_launcher();
                    }
                    Some(UiCommand::Terminate) => {
                        if !supervisor.terminate() {
                            let _ = event_tx.send(SupervisorEvent::Info(
                                "Nothing has been launched yet".into(),
                            ));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        supervisor.shutdown();
                        break;
                    }
                }
            }
            Some(fb) = feedback_rx.recv() => {
                supervisor.handle_feedback(fb);
            }
        }
    }
    tracing::debug!("controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CancelReason, Outcome, SupervisorConfig};
    use crate::catalog::{Tile, TileTarget};
    use crate::supervisor::reconcile::testing::{RecordingSurface, UiCall};
    use crate::supervisor::testing::{FakeSpawner, ScriptedTable, Step};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    struct Running {
        cmd_tx: UnboundedSender<UiCommand>,
        events: UnboundedReceiver<SupervisorEvent>,
        surface: RecordingSurface,
        table: Arc<ScriptedTable>,
        handle: JoinHandle<Result<()>>,
    }

    fn catalog() -> Catalog {
        Catalog {
            browser: vec!["firefox".into(), "--kiosk".into()],
            tiles: vec![Tile {
                id: "x".into(),
                name: "App X".into(),
                icon: String::new(),
                target: TileTarget::App {
                    command: vec!["appX".into()],
                },
                process_match_name: Some("appx".into()),
            }],
        }
    }

    fn start(spawner: FakeSpawner, script: &[Step], rest: Step, cfg: SupervisorConfig) -> Running {
        let surface = RecordingSurface::default();
        let table = ScriptedTable::new("appx", script, rest);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sup, feedback_rx) =
            Supervisor::new(cfg, spawner, table.clone(), surface.clone(), event_tx.clone());
        let handle = tokio::spawn(async move {
            let catalog = catalog();
            run_controller(&catalog, sup, feedback_rx, cmd_rx, event_tx).await
        });
        Running {
            cmd_tx,
            events,
            surface,
            table,
            handle,
        }
    }

    /// Collect events until one matches `done`.
    async fn until<F>(rx: &mut UnboundedReceiver<SupervisorEvent>, done: F) -> Vec<SupervisorEvent>
    where
        F: Fn(&SupervisorEvent) -> bool,
    {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            let stop = done(&ev);
            out.push(ev);
            if stop {
                break;
            }
        }
        out
    }

    fn is_concluded(ev: &SupervisorEvent) -> bool {
        matches!(ev, SupervisorEvent::SessionConcluded { .. })
    }

    #[tokio::test(start_paused = true)]
    async fn app_runs_then_exits_and_launcher_returns_once() {
        use Step::*;
        let mut r = start(
            FakeSpawner::default(),
            &[Absent, Absent, Absent, Present, Present, Present, Present, Present, Absent, Absent],
            Absent,
            SupervisorConfig::default(),
        );
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();

        let events = until(&mut r.events, is_concluded).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::SessionRunning { .. })));
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionConcluded {
                outcome: Outcome::Ended,
                ..
            })
        ));
        assert_eq!(r.table.query_count(), 10);

        // Give any stray ticks a chance to run; nothing else may happen.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.table.query_count(), 10);
        assert_eq!(r.surface.count(&UiCall::ShowPrimary), 1);
        assert!(r.surface.errors().is_empty());
        let calls = r.surface.calls();
        assert_eq!(calls.first(), Some(&UiCall::Loading("x".into(), true)));
        assert_eq!(calls.last(), Some(&UiCall::Loading("x".into(), false)));

        r.cmd_tx.send(UiCommand::Quit).unwrap();
        r.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn app_that_never_appears_times_out() {
        let mut r = start(FakeSpawner::default(), &[], Step::Absent, SupervisorConfig::default());
        let began = tokio::time::Instant::now();
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();

        let events = until(&mut r.events, is_concluded).await;
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionConcluded {
                outcome: Outcome::StartupTimeout,
                ..
            })
        ));
        assert_eq!(r.table.query_count(), 10);
        assert!(began.elapsed() >= Duration::from_secs(20));
        assert_eq!(r.surface.errors(), vec!["App X did not start".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_queries_count_as_failures() {
        let mut r = start(FakeSpawner::default(), &[], Step::Hang, SupervisorConfig::default());
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();

        let events = until(&mut r.events, is_concluded).await;
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionConcluded {
                outcome: Outcome::StartupTimeout,
                ..
            })
        ));
        let limit = SupervisorConfig::default().query_failure_limit as usize;
        assert_eq!(r.table.query_count(), limit);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_never_polls() {
        let mut r = start(FakeSpawner::failing(), &[], Step::Present, SupervisorConfig::default());
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();

        let events = until(&mut r.events, is_concluded).await;
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionConcluded {
                outcome: Outcome::SpawnError,
                ..
            })
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.table.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_polling_a_long_running_app() {
        let cfg = SupervisorConfig {
            ceiling: Duration::from_secs(30),
            ..Default::default()
        };
        let mut r = start(FakeSpawner::default(), &[], Step::Present, cfg);
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();

        let events = until(&mut r.events, |e| {
            matches!(e, SupervisorEvent::SessionCancelled { .. })
        })
        .await;
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionCancelled {
                reason: CancelReason::Ceiling,
                ..
            })
        ));
        assert!(!events.iter().any(is_concluded));
        let polled = r.table.query_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.table.query_count(), polled);
        assert_eq!(r.surface.count(&UiCall::ShowPrimary), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn return_to_launcher_stops_sampling() {
        let mut r = start(FakeSpawner::default(), &[], Step::Present, SupervisorConfig::default());
        r.cmd_tx.send(UiCommand::Launch("x".into())).unwrap();
        until(&mut r.events, |e| {
            matches!(e, SupervisorEvent::SessionRunning { .. })
        })
        .await;

        r.cmd_tx.send(UiCommand::ReturnToLauncher).unwrap();
        let events = until(&mut r.events, |e| {
            matches!(e, SupervisorEvent::SessionCancelled { .. })
        })
        .await;
        assert!(matches!(
            events.last(),
            Some(SupervisorEvent::SessionCancelled {
                reason: CancelReason::User,
                ..
            })
        ));

        let polled = r.table.query_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.table.query_count(), polled);
        assert_eq!(r.surface.count(&UiCall::ShowPrimary), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tile_is_reported_not_launched() {
        let mut r = start(FakeSpawner::default(), &[], Step::Absent, SupervisorConfig::default());
        r.cmd_tx.send(UiCommand::Launch("missing".into())).unwrap();
        let ev = r.events.recv().await;
        assert!(matches!(
            ev,
            Some(SupervisorEvent::Notify {
                severity: Severity::Error,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_commands_shuts_down() {
        let r = start(FakeSpawner::default(), &[], Step::Absent, SupervisorConfig::default());
        drop(r.cmd_tx);
        r.handle.await.unwrap().unwrap();
    }
}
