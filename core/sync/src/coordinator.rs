//! Event-driven reconciliation of pending intents with the remote.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use postsync_common::{Error, PostId, Result};
use postsync_remote::SyncTransport;

use crate::network::{ConnectivityState, NetworkObserver};
use crate::queue::{Intent, PendingActions, PendingQueue};
use crate::trigger::SyncTrigger;

/// Coordinator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every snapshotted id was attempted.
    Completed,
    /// Nothing was pending.
    Empty,
    /// Disconnected when the pass was due; nothing attempted.
    Offline,
    /// Connectivity dropped mid-pass.
    Interrupted,
    /// The coordinator shut down mid-pass.
    Cancelled,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub outcome: PassOutcome,
    pub favorites_confirmed: Vec<PostId>,
    pub unfavorites_confirmed: Vec<PostId>,
    /// Ids whose confirmation failed; they stay pending.
    pub failed: Vec<PostId>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn skipped(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            favorites_confirmed: Vec::new(),
            unfavorites_confirmed: Vec::new(),
            failed: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    /// Number of ids confirmed by the remote in this pass.
    pub fn confirmed(&self) -> usize {
        self.favorites_confirmed.len() + self.unfavorites_confirmed.len()
    }
}

/// Observable coordinator state.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStatus {
    pub phase: SyncPhase,
    /// Passes that reached the syncing phase. Skipped passes are not counted.
    pub passes_completed: u64,
    pub last_report: Option<SyncReport>,
}

/// Handle to the background reconciliation task.
///
/// Passes run one at a time. Triggers: queue mutations (via the shared
/// [`SyncTrigger`]), transitions to connected, and explicit [`sync_now`]
/// requests. Triggers raised during a pass collapse into one follow-up pass.
///
/// [`sync_now`]: SyncCoordinator::sync_now
pub struct SyncCoordinator {
    requests: mpsc::Sender<oneshot::Sender<SyncReport>>,
    status: watch::Receiver<CoordinatorStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Spawn the coordinator task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        queue: Arc<PendingQueue>,
        transport: Arc<dyn SyncTransport>,
        network: Arc<NetworkObserver>,
        trigger: SyncTrigger,
    ) -> Self {
        let (requests, request_rx) = mpsc::channel(16);
        let (status_tx, status) = watch::channel(CoordinatorStatus::default());
        let cancel = CancellationToken::new();
        let events = network.subscribe();

        let worker = SyncWorker {
            queue,
            transport,
            network,
            trigger,
            status: status_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(events, request_rx));

        Self {
            requests,
            status,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run a pass now and wait for its report.
    ///
    /// # Errors
    /// - `Cancelled` if the coordinator has shut down
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(reply_tx)
            .await
            .map_err(|_| Error::Cancelled)?;
        reply_rx.await.map_err(|_| Error::Cancelled)
    }

    /// Observable phase and pass history.
    pub fn status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Stop the task, abandoning any in-flight confirmation.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SyncWorker {
    queue: Arc<PendingQueue>,
    transport: Arc<dyn SyncTransport>,
    network: Arc<NetworkObserver>,
    trigger: SyncTrigger,
    status: watch::Sender<CoordinatorStatus>,
    cancel: CancellationToken,
}

impl SyncWorker {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<ConnectivityState>,
        mut requests: mpsc::Receiver<oneshot::Sender<SyncReport>>,
    ) {
        info!("Sync coordinator started");
        let mut events_open = true;

        loop {
            let reply = tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(reply) = requests.recv() => Some(reply),
                _ = self.trigger.fired() => None,
                event = events.recv(), if events_open => match event {
                    Some(state) if state.connected => None,
                    Some(_) => continue,
                    None => {
                        events_open = false;
                        continue;
                    }
                },
            };

            let report = self.run_pass().await;
            self.remember_reconnects(&mut events);
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }

        info!("Sync coordinator stopped");
    }

    /// Fold transitions that arrived during a pass into one trigger.
    fn remember_reconnects(&self, events: &mut mpsc::UnboundedReceiver<ConnectivityState>) {
        let mut reconnected = false;
        while let Ok(state) = events.try_recv() {
            reconnected |= state.connected;
        }
        if reconnected {
            debug!("Reconnected during pass, scheduling follow-up");
            self.trigger.fire();
        }
    }

    async fn run_pass(&self) -> SyncReport {
        let snapshot = self.queue.snapshot().await;
        if snapshot.is_empty() {
            return self.finish(SyncReport::skipped(PassOutcome::Empty));
        }
        if !self.network.is_connected() {
            info!("No network connection, delaying sync");
            return self.finish(SyncReport::skipped(PassOutcome::Offline));
        }

        self.status.send_modify(|s| s.phase = SyncPhase::Syncing);
        info!(
            "Starting sync of pending actions - Favorites: {}, Unfavorites: {}",
            snapshot.favorites().len(),
            snapshot.unfavorites().len()
        );

        let mut confirmed = PendingActions::new();
        let mut failed = Vec::new();
        let mut outcome = PassOutcome::Completed;
        let mut online = self.network.watch();

        'pass: for (intent, ids) in [
            (Intent::Favorite, snapshot.favorites()),
            (Intent::Unfavorite, snapshot.unfavorites()),
        ] {
            for &id in ids {
                if !*online.borrow() {
                    outcome = PassOutcome::Interrupted;
                    break 'pass;
                }

                let attempt = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        outcome = PassOutcome::Cancelled;
                        break 'pass;
                    }
                    _ = online.wait_for(|connected| !*connected) => {
                        outcome = PassOutcome::Interrupted;
                        break 'pass;
                    }
                    result = self.confirm(intent, id) => result,
                };

                match attempt {
                    Ok(()) => {
                        debug!("Successfully synced {} for post: {}", intent, id);
                        confirmed.mark(intent, id);
                    }
                    Err(e) => {
                        warn!("Failed to sync {} for post {}: {}", intent, id, e);
                        failed.push(id);
                    }
                }
            }
        }

        self.queue.settle(&confirmed).await;

        let report = SyncReport {
            outcome,
            favorites_confirmed: confirmed.favorites().iter().copied().collect(),
            unfavorites_confirmed: confirmed.unfavorites().iter().copied().collect(),
            failed,
            finished_at: Utc::now(),
        };
        info!(
            "Completed sync of pending actions ({:?}) - Synced {} favorites and {} unfavorites, {} failed",
            report.outcome,
            report.favorites_confirmed.len(),
            report.unfavorites_confirmed.len(),
            report.failed.len()
        );
        self.finish(report)
    }

    async fn confirm(&self, intent: Intent, id: PostId) -> Result<()> {
        match intent {
            Intent::Favorite => self.transport.confirm_favorite(id).await,
            Intent::Unfavorite => self.transport.confirm_unfavorite(id).await,
        }
    }

    fn finish(&self, report: SyncReport) -> SyncReport {
        self.status.send_modify(|s| {
            s.phase = SyncPhase::Idle;
            if !matches!(report.outcome, PassOutcome::Empty | PassOutcome::Offline) {
                s.passes_completed += 1;
            }
            s.last_report = Some(report.clone());
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postsync_remote::MockRemote;
    use postsync_storage::MemorySlot;
    use std::time::Duration;

    struct Harness {
        remote: MockRemote,
        network: Arc<NetworkObserver>,
        queue: Arc<PendingQueue>,
        coordinator: SyncCoordinator,
    }

    async fn harness(connected: bool) -> Harness {
        let remote = MockRemote::new();
        let network = Arc::new(NetworkObserver::new());
        network.path_update(connected);
        let trigger = SyncTrigger::new();
        let queue = Arc::new(PendingQueue::restore(Arc::new(MemorySlot::new()), trigger.clone()).await);
        let coordinator = SyncCoordinator::start(
            queue.clone(),
            Arc::new(remote.clone()),
            network.clone(),
            trigger,
        );
        Harness {
            remote,
            network,
            queue,
            coordinator,
        }
    }

    fn id(n: i64) -> PostId {
        PostId::new(n)
    }

    async fn wait_for_outcome(coordinator: &SyncCoordinator, outcome: PassOutcome) -> SyncReport {
        let mut status = coordinator.status();
        let status = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.last_report.as_ref().map(|r| r.outcome) == Some(outcome)),
        )
        .await
        .expect("pass did not finish in time")
        .unwrap();
        status.last_report.clone().unwrap()
    }

    #[tokio::test]
    async fn test_pass_confirms_and_clears() {
        let h = harness(true).await;
        h.remote.hold_confirmations();
        h.queue.mark_favorite_pending(id(1)).await;
        h.queue.mark_favorite_pending(id(2)).await;
        h.queue.mark_unfavorite_pending(id(3)).await;
        h.remote.release_confirmations(100);

        let report = h.coordinator.sync_now().await.unwrap();
        assert!(h.queue.is_empty().await);
        assert!(report.failed.is_empty());

        let mut confirmations = h.remote.confirmations();
        confirmations.sort();
        assert_eq!(
            confirmations,
            vec![(id(1), true), (id(2), true), (id(3), false)]
        );
    }

    #[tokio::test]
    async fn test_offline_pass_keeps_pending() {
        let h = harness(false).await;
        h.queue.mark_favorite_pending(id(42)).await;

        let report = h.coordinator.sync_now().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Offline);
        assert!(h.queue.snapshot().await.contains(Intent::Favorite, id(42)));
        assert!(h.remote.confirmations().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_failed_id() {
        let h = harness(false).await;
        h.remote.fail_confirmations_for(id(7));
        h.queue.mark_favorite_pending(id(7)).await;
        h.queue.mark_favorite_pending(id(8)).await;

        h.network.path_update(true);
        let report = h.coordinator.sync_now().await.unwrap();

        assert_eq!(report.failed, vec![id(7)]);
        let pending = h.queue.snapshot().await;
        assert!(pending.contains(Intent::Favorite, id(7)));
        assert!(!pending.contains(Intent::Favorite, id(8)));

        h.remote.clear_confirmation_failure(id(7));
        h.coordinator.sync_now().await.unwrap();
        assert!(h.queue.is_empty().await);
        assert_eq!(h.remote.confirmations(), vec![(id(8), true), (id(7), true)]);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_pass() {
        let h = harness(false).await;
        h.queue.mark_favorite_pending(id(42)).await;
        wait_for_outcome(&h.coordinator, PassOutcome::Offline).await;

        h.network.path_update(true);
        let report = wait_for_outcome(&h.coordinator, PassOutcome::Completed).await;

        assert_eq!(report.favorites_confirmed, vec![id(42)]);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_queue_mutation_triggers_pass() {
        let h = harness(true).await;
        h.queue.mark_unfavorite_pending(id(5)).await;

        let report = wait_for_outcome(&h.coordinator, PassOutcome::Completed).await;
        assert_eq!(report.unfavorites_confirmed, vec![id(5)]);
    }

    #[tokio::test]
    async fn test_disconnect_mid_pass_keeps_in_flight_pending() {
        let h = harness(true).await;
        h.remote.hold_confirmations();
        h.queue.mark_favorite_pending(id(1)).await;
        h.queue.mark_favorite_pending(id(2)).await;

        let mut attempts = h.remote.attempts();
        attempts.wait_for(|n| *n >= 1).await.unwrap();
        h.network.path_update(false);

        let report = wait_for_outcome(&h.coordinator, PassOutcome::Interrupted).await;
        assert_eq!(report.confirmed(), 0);
        let pending = h.queue.snapshot().await;
        assert!(pending.contains(Intent::Favorite, id(1)));
        assert!(pending.contains(Intent::Favorite, id(2)));
    }

    #[tokio::test]
    async fn test_disconnect_after_partial_progress_settles_confirmed() {
        let h = harness(true).await;
        h.remote.hold_confirmations();
        h.queue.mark_favorite_pending(id(1)).await;
        h.queue.mark_favorite_pending(id(2)).await;

        let mut attempts = h.remote.attempts();
        attempts.wait_for(|n| *n >= 1).await.unwrap();
        h.remote.release_confirmations(1);
        attempts.wait_for(|n| *n >= 2).await.unwrap();
        h.network.path_update(false);

        let report = wait_for_outcome(&h.coordinator, PassOutcome::Interrupted).await;
        assert_eq!(report.favorites_confirmed, vec![id(1)]);
        assert!(report.failed.is_empty());
        let pending = h.queue.snapshot().await;
        assert!(!pending.contains(Intent::Favorite, id(1)));
        assert!(pending.contains(Intent::Favorite, id(2)));
        assert_eq!(h.remote.confirmations(), vec![(id(1), true)]);
    }

    #[tokio::test]
    async fn test_skipped_passes_are_not_counted() {
        let h = harness(false).await;
        assert_eq!(h.coordinator.sync_now().await.unwrap().outcome, PassOutcome::Empty);

        h.queue.mark_favorite_pending(id(42)).await;
        wait_for_outcome(&h.coordinator, PassOutcome::Offline).await;
        assert_eq!(h.coordinator.status().borrow().passes_completed, 0);

        h.network.path_update(true);
        wait_for_outcome(&h.coordinator, PassOutcome::Completed).await;
        assert_eq!(h.coordinator.status().borrow().passes_completed, 1);
    }

    #[tokio::test]
    async fn test_triggers_during_pass_coalesce() {
        let h = harness(true).await;
        h.remote.hold_confirmations();
        h.queue.mark_favorite_pending(id(1)).await;

        let mut attempts = h.remote.attempts();
        attempts.wait_for(|n| *n >= 1).await.unwrap();

        h.queue.mark_favorite_pending(id(2)).await;
        h.queue.mark_favorite_pending(id(3)).await;
        h.remote.release_confirmations(100);

        let mut status = h.coordinator.status();
        status.wait_for(|s| s.passes_completed >= 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.coordinator.status().borrow().passes_completed, 2);
        assert!(h.queue.is_empty().await);
        assert_eq!(
            h.remote.confirmations(),
            vec![(id(1), true), (id(2), true), (id(3), true)]
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_coordinator() {
        let h = harness(true).await;
        h.coordinator.shutdown().await;
        assert!(matches!(h.coordinator.sync_now().await, Err(Error::Cancelled)));
    }
}
