use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{domain::BroadcastId, Error, Result};

use super::{BroadcastEngine, BroadcastJob, RunReport};

/// Owns the lifecycle of background broadcast runs.
///
/// Callers submit jobs and return immediately. Each job runs as its own task
/// (runs are concurrent with each other, sequential inside). Every outcome,
/// including a panicking run, is logged here.
#[derive(Clone)]
pub struct BroadcastSupervisor {
    tx: mpsc::UnboundedSender<BroadcastJob>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BroadcastSupervisor {
    /// Start the supervisor task. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<BroadcastEngine>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(engine, rx, cancel.clone()));

        Self {
            tx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Queue a run. Does not wait for delivery.
    pub fn submit(&self, job: BroadcastJob) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::External(
                "broadcast supervisor is shut down".to_string(),
            ));
        }
        let id = job.broadcast_id;
        self.tx
            .send(job)
            .map_err(|_| Error::External("broadcast supervisor is not running".to_string()))?;
        info!("Broadcast {id} queued");
        Ok(())
    }

    /// Stop accepting jobs and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Broadcast supervisor task failed: {e}");
            }
        }
    }
}

async fn supervise(
    engine: Arc<BroadcastEngine>,
    mut rx: mpsc::UnboundedReceiver<BroadcastJob>,
    cancel: CancellationToken,
) {
    let mut runs: JoinSet<(BroadcastId, Result<RunReport>)> = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else {
                    break;
                };
                let engine = engine.clone();
                runs.spawn(async move {
                    let id = job.broadcast_id;
                    (id, engine.run(job).await)
                });
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => log_outcome(joined),
        }
    }

    // Jobs queued before shutdown still run.
    rx.close();
    while let Some(job) = rx.recv().await {
        let engine = engine.clone();
        runs.spawn(async move {
            let id = job.broadcast_id;
            (id, engine.run(job).await)
        });
    }

    while let Some(joined) = runs.join_next().await {
        log_outcome(joined);
    }
    info!("Broadcast supervisor stopped");
}

fn log_outcome(joined: std::result::Result<(BroadcastId, Result<RunReport>), JoinError>) {
    match joined {
        Ok((_, Ok(report))) => info!(
            "Broadcast {} finished: {}/{} delivered, {} failed",
            report.broadcast_id, report.sent, report.total, report.failed
        ),
        Ok((id, Err(e))) => error!("Broadcast {id} aborted: {e}"),
        Err(e) => error!("Broadcast run crashed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::engine::tests::{FakeChannel, FakeStore, RecordingSleeper};
    use crate::broadcast::{BroadcastSettings, Payload};

    fn engine(store: Arc<FakeStore>, channel: Arc<FakeChannel>) -> Arc<BroadcastEngine> {
        Arc::new(
            BroadcastEngine::new(
                store.clone(),
                store.clone(),
                store,
                channel,
                BroadcastSettings::default(),
            )
            .with_sleeper(Arc::new(RecordingSleeper::default())),
        )
    }

    fn job(id: u64, text: &str) -> BroadcastJob {
        BroadcastJob {
            broadcast_id: BroadcastId(id),
            account: None,
            payload: Payload::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn runs_submitted_jobs_and_drains_on_shutdown() {
        let store = Arc::new(FakeStore::with_recipients(3));
        let channel = Arc::new(FakeChannel::default());
        let sup = BroadcastSupervisor::spawn(engine(store.clone(), channel.clone()));

        sup.submit(job(1, "a")).unwrap();
        sup.submit(job(2, "b")).unwrap();
        sup.shutdown().await;

        let mut counters = store.counters.lock().unwrap().clone();
        counters.sort();
        assert_eq!(
            counters,
            vec![(BroadcastId(1), 3, 0), (BroadcastId(2), 3, 0)]
        );
        assert_eq!(channel.calls().len(), 6);
    }

    #[tokio::test]
    async fn rejects_jobs_after_shutdown() {
        let store = Arc::new(FakeStore::with_recipients(1));
        let sup = BroadcastSupervisor::spawn(engine(store, Arc::new(FakeChannel::default())));

        sup.shutdown().await;
        assert!(sup.submit(job(1, "late")).is_err());
    }

    #[tokio::test]
    async fn panicking_run_does_not_stop_other_runs() {
        let store = Arc::new(FakeStore {
            panic_account: Some("boom"),
            ..FakeStore::with_recipients(3)
        });
        let channel = Arc::new(FakeChannel::default());
        let sup = BroadcastSupervisor::spawn(engine(store.clone(), channel.clone()));

        sup.submit(BroadcastJob {
            account: Some("boom".into()),
            ..job(1, "x")
        })
        .unwrap();
        sup.submit(job(2, "y")).unwrap();
        sup.shutdown().await;

        assert_eq!(
            *store.counters.lock().unwrap(),
            vec![(BroadcastId(2), 3, 0)]
        );
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn failed_runs_still_let_shutdown_complete() {
        let store = Arc::new(FakeStore {
            fail_snapshot: true,
            ..Default::default()
        });
        let channel = Arc::new(FakeChannel::default());
        let sup = BroadcastSupervisor::spawn(engine(store.clone(), channel.clone()));

        sup.submit(job(1, "x")).unwrap();
        sup.submit(job(2, "y")).unwrap();
        sup.shutdown().await;

        assert!(store.counters.lock().unwrap().is_empty());
        assert!(channel.calls().is_empty());
    }
}
