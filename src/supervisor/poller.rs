use crate::model::SessionId;
use crate::supervisor::process::{snapshot_matches, ChildExit, ProcessTable, QueryError};
use crate::supervisor::session::Sample;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};

/// tokio intervals panic on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Messages from per-session tasks back to the owner of the supervisor.
/// Each carries the id of the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Feedback {
    Sample { id: SessionId, sample: Sample },
    ChildExited { id: SessionId, exit: ChildExit },
    CeilingReached { id: SessionId },
}

impl Feedback {
    pub fn session_id(&self) -> SessionId {
        match self {
            Feedback::Sample { id, .. }
            | Feedback::ChildExited { id, .. }
            | Feedback::CeilingReached { id } => *id,
        }
    }
}

/// Parameters for one session's poll loop.
pub(crate) struct PollParams<T> {
    pub id: SessionId,
    pub table: Arc<T>,
    pub match_name: String,
    pub interval: Duration,
    pub query_timeout: Duration,
    pub ceiling: Duration,
    pub feedback_tx: UnboundedSender<Feedback>,
    pub cancel: Arc<AtomicBool>,
}

/// Sample the process table every `interval` until cancelled or the ceiling
/// is reached. The first sample is taken one interval after arming.
pub(crate) async fn run_liveness_poller<T: ProcessTable>(params: PollParams<T>) {
    let PollParams {
        id,
        table,
        match_name,
        interval,
        query_timeout,
        ceiling,
        feedback_tx,
        cancel,
    } = params;

    let interval = interval.max(MIN_INTERVAL);
    let start = Instant::now();
    let deadline = start + ceiling;
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::time::sleep_until(deadline) => {
                if !cancel.load(Ordering::Relaxed) {
                    let _ = feedback_tx.send(Feedback::CeilingReached { id });
                }
                break;
            }
        }
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let sample = probe(table.as_ref(), &match_name, query_timeout).await;

        // The session may have been cancelled while the query was in flight.
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!(session = %id, "discarding sample for cancelled session");
            break;
        }
        if feedback_tx.send(Feedback::Sample { id, sample }).is_err() {
            break;
        }
    }
    tracing::debug!(session = %id, "poller stopped");
}

/// One bounded process-table query, folded into a sample.
pub(crate) async fn probe<T: ProcessTable + ?Sized>(
    table: &T,
    match_name: &str,
    query_timeout: Duration,
) -> Sample {
    let res = match tokio::time::timeout(query_timeout, table.snapshot()).await {
        Ok(res) => res,
        Err(_) => Err(QueryError::Timeout),
    };
    match res {
        Ok(snapshot) if snapshot_matches(&snapshot, match_name) => Sample::Match,
        Ok(_) => Sample::NoMatch,
        Err(e) => {
            tracing::warn!(error = %e, match_name, "process table query failed");
            Sample::QueryFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testing::{ScriptedTable, Step};
    use tokio::sync::mpsc;

    fn params(
        table: Arc<ScriptedTable>,
        interval: Duration,
        query_timeout: Duration,
    ) -> (
        PollParams<ScriptedTable>,
        mpsc::UnboundedReceiver<Feedback>,
        Arc<AtomicBool>,
    ) {
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let p = PollParams {
            id: SessionId(1),
            table,
            match_name: "appx".into(),
            interval,
            query_timeout,
            ceiling: Duration::from_secs(3600),
            feedback_tx,
            cancel: cancel.clone(),
        };
        (p, feedback_rx, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_result_is_dropped_after_cancel() {
        let table = ScriptedTable::new("appx", &[], Step::Hang);
        let (p, mut rx, cancel) =
            params(table.clone(), Duration::from_secs(2), Duration::from_secs(10));
        let handle = tokio::spawn(run_liveness_poller(p));

        // First query starts at 2s and hangs until its 10s timeout.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(table.query_count(), 1);
        cancel.store(true, Ordering::Relaxed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
        assert_eq!(table.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_never_queries() {
        let table = ScriptedTable::new("appx", &[], Step::Present);
        let (p, mut rx, cancel) =
            params(table.clone(), Duration::from_secs(2), Duration::from_secs(1));
        cancel.store(true, Ordering::Relaxed);
        let handle = tokio::spawn(run_liveness_poller(p));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
        assert_eq!(table.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_samples() {
        let table = ScriptedTable::new("appx", &[], Step::Present);
        let (p, mut rx, cancel) = params(table, Duration::ZERO, Duration::from_secs(1));
        let handle = tokio::spawn(run_liveness_poller(p));

        let fb = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(
            fb.ok().flatten(),
            Some(Feedback::Sample {
                id: SessionId(1),
                sample: Sample::Match
            })
        );
        cancel.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_finished());
    }
}
