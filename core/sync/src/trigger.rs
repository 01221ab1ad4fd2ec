//! Coalescing wake-up signal for the sync coordinator.

use std::sync::Arc;
use tokio::sync::Notify;

/// Wakes the coordinator.
///
/// Firing while nobody waits stores a single wake-up, so any number of
/// triggers raised during a pass collapse into one follow-up pass.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a reconciliation pass. Never blocks.
    pub fn fire(&self) {
        self.notify.notify_one();
    }

    /// Wait until the trigger has been fired.
    pub async fn fired(&self) {
        self.notify.notified().await;
    }
}
