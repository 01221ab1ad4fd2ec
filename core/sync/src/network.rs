//! Connectivity observation and fan-out.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connectivity as last reported by the path monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub connected: bool,
}

/// Source of raw path updates (platform monitor, probe, test channel).
#[async_trait]
pub trait PathMonitor: Send {
    /// Wait for the next path update.
    ///
    /// Returns `None` once the underlying facility is gone.
    async fn next_update(&mut self) -> Option<bool>;
}

#[async_trait]
impl PathMonitor for mpsc::UnboundedReceiver<bool> {
    async fn next_update(&mut self) -> Option<bool> {
        self.recv().await
    }
}

/// Tracks connectivity and broadcasts transitions.
///
/// State starts disconnected and changes only through [`path_update`],
/// which is serialized so there is exactly one writer. Every transition is
/// delivered once, in order, to every subscriber.
///
/// [`path_update`]: NetworkObserver::path_update
pub struct NetworkObserver {
    state: watch::Sender<bool>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectivityState>>>,
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkObserver {
    /// Create an observer in the disconnected state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ConnectivityState>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the last path update reported connectivity.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Observable connectivity value.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Receive every future transition.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    /// Apply a path update from the monitor.
    ///
    /// Returns `true` if the update was a transition.
    pub fn path_update(&self, connected: bool) -> bool {
        let mut subscribers = self.subscribers();

        let changed = self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if !changed {
            debug!("Path update without transition (connected: {})", connected);
            return false;
        }

        info!(
            "Network connection status changed: {}",
            if connected { "Connected" } else { "Disconnected" }
        );
        let event = ConnectivityState { connected };
        subscribers.retain(|tx| tx.send(event).is_ok());
        true
    }

    /// Wait until connectivity is reported.
    pub async fn wait_until_connected(&self) {
        let mut rx = self.watch();
        // The sender lives in `self`, so this only ends once connected.
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Feed path updates from `monitor` until cancelled.
    ///
    /// If the monitor goes away the last state is kept; an observer that
    /// never hears from its monitor stays disconnected.
    pub async fn run_monitor<M: PathMonitor>(&self, mut monitor: M, cancel: CancellationToken) {
        info!("Starting network monitoring");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Network monitoring cancelled");
                    break;
                }
                update = monitor.next_update() => match update {
                    Some(connected) => {
                        self.path_update(connected);
                    }
                    None => {
                        warn!("Path monitor unavailable, connectivity state frozen");
                        break;
                    }
                },
            }
        }
    }
}
