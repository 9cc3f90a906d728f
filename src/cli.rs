use crate::catalog::{self, Catalog, TileTarget};
use crate::logging::LogTarget;
use crate::model::{Outcome, SupervisorConfig, SupervisorEvent};
use crate::orchestrator::{self, UiCommand};
use crate::supervisor::process::{DetachedSpawner, SysinfoProcessTable};
use crate::supervisor::reconcile::ChannelSurface;
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Durations that drive timers must be positive.
fn parse_nonzero_duration(s: &str) -> Result<humantime::Duration, String> {
    let d: humantime::Duration = s.parse().map_err(|e| format!("{e}"))?;
    if Duration::from(d).is_zero() {
        return Err("must be greater than zero".into());
    }
    Ok(d)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "streaming-launcher",
    version,
    about = "Kiosk launcher for streaming services and media apps"
)]
pub struct Cli {
    /// Development mode: no fullscreen, debug logging
    #[arg(long)]
    pub dev: bool,

    /// Tile catalog (JSON). Defaults to the user config dir, then built-in tiles
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Print the tile catalog and exit
    #[arg(long)]
    pub list: bool,

    /// Print JSON instead of text (with --list or --launch)
    #[arg(long)]
    pub json: bool,

    /// Launch one tile without the TUI and wait until it exits
    #[arg(long, value_name = "TILE")]
    pub launch: Option<String>,

    /// Interval between process-table samples
    #[arg(long, default_value = "2s", value_parser = parse_nonzero_duration)]
    pub poll_interval: humantime::Duration,

    /// Upper bound for a single process-table query
    #[arg(long, default_value = "1s", value_parser = parse_nonzero_duration)]
    pub query_timeout: humantime::Duration,

    /// Samples without the app before a launch counts as failed
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub startup_ticks: u32,

    /// Consecutive missed samples before a running app counts as exited
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub debounce_ticks: u32,

    /// Consecutive failed process-table queries tolerated
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub query_failure_limit: u32,

    /// Stop watching a session after this long, whatever its state
    #[arg(long, default_value = "40m", value_parser = parse_nonzero_duration)]
    pub ceiling: humantime::Duration,

    /// Also terminate the app when returning to the launcher
    #[arg(long)]
    pub kill_on_return: bool,

    /// Log filter (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file used while the TUI is running
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Whether this invocation runs the interactive launcher.
    pub fn is_interactive(&self) -> bool {
        cfg!(feature = "tui") && !self.list && self.launch.is_none()
    }

    pub fn log_target(&self) -> LogTarget<'_> {
        if self.is_interactive() {
            LogTarget::File(self.log_file.as_deref())
        } else {
            LogTarget::Stderr
        }
    }

    pub fn effective_log_level(&self) -> &str {
        if self.dev && self.log_level == "info" {
            "debug"
        } else {
            &self.log_level
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && !args.list && args.launch.is_none() {
        return Err(anyhow::anyhow!(
            "--json can only be used with --list or --launch."
        ));
    }

    let catalog = catalog::load(args.catalog.as_deref())?;

    if args.list {
        return print_catalog(&catalog, args.json);
    }

    if let Some(tile_id) = args.launch.clone() {
        return run_headless(args, catalog, tile_id).await;
    }

    #[cfg(feature = "tui")]
    {
        crate::tui::run(args, catalog).await
    }
    #[cfg(not(feature = "tui"))]
    {
        Err(anyhow::anyhow!(
            "built without TUI support; use --list or --launch <TILE>"
        ))
    }
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from(args.poll_interval),
        query_timeout: Duration::from(args.query_timeout),
        startup_ticks: args.startup_ticks,
        debounce_ticks: args.debounce_ticks,
        query_failure_limit: args.query_failure_limit,
        ceiling: Duration::from(args.ceiling),
        kill_on_return: args.kill_on_return,
    }
}

/// Build the production supervisor wired to an event channel.
pub(crate) fn build_supervisor(
    args: &Cli,
    event_tx: mpsc::UnboundedSender<SupervisorEvent>,
) -> (
    Supervisor<DetachedSpawner, SysinfoProcessTable, ChannelSurface>,
    mpsc::UnboundedReceiver<crate::supervisor::poller::Feedback>,
) {
    let cfg = build_config(args);
    tracing::debug!(?cfg, "supervisor config");
    Supervisor::new(
        cfg,
        DetachedSpawner,
        Arc::new(SysinfoProcessTable::new()),
        ChannelSurface::new(event_tx.clone()),
        event_tx,
    )
}

fn print_catalog(catalog: &Catalog, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(catalog)?;
        println!("{out}");
        return Ok(());
    }
    for (i, tile) in catalog.tiles.iter().enumerate() {
        let target = match &tile.target {
            TileTarget::Url { url } => format!("url {url}"),
            TileTarget::App { command } => format!("app {}", command.join(" ")),
        };
        println!("{:>2}. {:<12} {:<16} {}", i + 1, tile.id, tile.name, target);
    }
    Ok(())
}

/// Launch one tile, stream supervisor events, and return once the session
/// is over. Failure outcomes become errors so the exit code reflects them.
async fn run_headless(args: Cli, catalog: Catalog, tile_id: String) -> Result<()> {
    let request = catalog
        .request_for(&tile_id)
        .context("cannot launch tile")?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SupervisorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let (supervisor, feedback_rx) = build_supervisor(&args, event_tx.clone());
    let controller = tokio::spawn(async move {
        orchestrator::run_controller(&catalog, supervisor, feedback_rx, cmd_rx, event_tx).await
    });

    let _ = cmd_tx.send(UiCommand::Launch(tile_id));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut outcome: Option<Outcome> = None;

    loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else { break };
                let line = if args.json {
                    OutputLine::Stdout(serde_json::to_string(&ev)?)
                } else {
                    OutputLine::Stderr(ev.to_message())
                };
                let _ = out_tx.send(line);
                match ev {
                    SupervisorEvent::SessionConcluded { outcome: o, .. } => {
                        outcome = Some(o);
                        let _ = cmd_tx.send(UiCommand::Quit);
                    }
                    SupervisorEvent::SessionCancelled { .. } => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                    }
                    _ => {}
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let _ = out_tx.send(OutputLine::Stderr("Interrupted, returning…".into()));
                let _ = cmd_tx.send(UiCommand::ReturnToLauncher);
            }
        }
    }

    controller.await.context("controller task failed")??;
    drop(out_tx);
    let _ = out_handle.await;

    match outcome {
        Some(o) if o.is_failure() => Err(anyhow::anyhow!(
            "{} failed: {o:?}",
            request.display_name
        )),
        _ => Ok(()),
    }
}
