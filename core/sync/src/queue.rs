//! Pending favorite/unfavorite intents and their durable snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use postsync_common::{Error, PostId, Result};
use postsync_storage::KeyValueSlot;

use crate::trigger::SyncTrigger;

/// Slot key under which the queue snapshot is stored.
pub const PENDING_SLOT_KEY: &str = "PendingSyncActions";

/// Direction of a favorite intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Favorite,
    Unfavorite,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Favorite => write!(f, "favorite"),
            Intent::Unfavorite => write!(f, "unfavorite"),
        }
    }
}

/// Two disjoint sets of post ids awaiting remote confirmation.
///
/// An id is in at most one set; marking it in one evicts it from the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingActions {
    favorites: BTreeSet<PostId>,
    unfavorites: BTreeSet<PostId>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intent. Returns `true` if the sets changed.
    pub fn mark(&mut self, intent: Intent, id: PostId) -> bool {
        let (target, other) = match intent {
            Intent::Favorite => (&mut self.favorites, &mut self.unfavorites),
            Intent::Unfavorite => (&mut self.unfavorites, &mut self.favorites),
        };
        let evicted = other.remove(&id);
        let inserted = target.insert(id);
        evicted || inserted
    }

    pub fn favorites(&self) -> &BTreeSet<PostId> {
        &self.favorites
    }

    pub fn unfavorites(&self) -> &BTreeSet<PostId> {
        &self.unfavorites
    }

    pub fn contains(&self, intent: Intent, id: PostId) -> bool {
        match intent {
            Intent::Favorite => self.favorites.contains(&id),
            Intent::Unfavorite => self.unfavorites.contains(&id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.favorites.is_empty() && self.unfavorites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.favorites.len() + self.unfavorites.len()
    }

    /// Remove confirmed ids from the set they were confirmed in.
    ///
    /// An id that moved to the opposite set since confirmation stays there.
    /// Returns `true` if the sets changed.
    pub fn settle(&mut self, confirmed: &PendingActions) -> bool {
        let before = self.len();
        self.favorites.retain(|id| !confirmed.favorites.contains(id));
        self.unfavorites.retain(|id| !confirmed.unfavorites.contains(id));
        self.len() != before
    }

    /// Drop every intent. Returns `true` if anything was pending.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.is_empty();
        self.favorites.clear();
        self.unfavorites.clear();
        had_any
    }

    fn to_snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            favorites: self.favorites.iter().copied().collect(),
            unfavorites: self.unfavorites.iter().copied().collect(),
        }
    }

    fn from_snapshot(snapshot: PendingSnapshot) -> Self {
        let mut actions = Self::new();
        for id in snapshot.favorites {
            actions.mark(Intent::Favorite, id);
        }
        // A snapshot listing an id twice resolves to the unfavorite.
        for id in snapshot.unfavorites {
            actions.mark(Intent::Unfavorite, id);
        }
        actions
    }
}

/// On-disk format of the queue.
#[derive(Debug, Serialize, Deserialize)]
struct PendingSnapshot {
    favorites: Vec<PostId>,
    unfavorites: Vec<PostId>,
}

/// Durable queue of pending intents.
///
/// Every state change is written to the slot. Slot failures are logged and
/// the queue keeps working in memory for the session.
pub struct PendingQueue {
    actions: Mutex<PendingActions>,
    slot: Arc<dyn KeyValueSlot>,
    trigger: SyncTrigger,
    /// Set while the slot holds an older snapshot than `actions`.
    unsaved: AtomicBool,
}

impl PendingQueue {
    /// Load the queue from `slot`.
    ///
    /// A missing, unreadable or corrupt snapshot yields an empty queue.
    pub async fn restore(slot: Arc<dyn KeyValueSlot>, trigger: SyncTrigger) -> Self {
        let actions = match Self::load(slot.as_ref()).await {
            Ok(Some(actions)) => {
                debug!(
                    "Loaded pending actions - Favorites: {}, Unfavorites: {}",
                    actions.favorites.len(),
                    actions.unfavorites.len()
                );
                actions
            }
            Ok(None) => {
                debug!("No pending actions found");
                PendingActions::new()
            }
            Err(e) => {
                error!("Failed to load pending actions, starting empty: {}", e);
                PendingActions::new()
            }
        };

        Self {
            actions: Mutex::new(actions),
            slot,
            trigger,
            unsaved: AtomicBool::new(false),
        }
    }

    async fn load(slot: &dyn KeyValueSlot) -> Result<Option<PendingActions>> {
        let Some(bytes) = slot.get(PENDING_SLOT_KEY).await? else {
            return Ok(None);
        };
        let snapshot: PendingSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::QueuePersistence(format!("Corrupt snapshot: {}", e)))?;
        Ok(Some(PendingActions::from_snapshot(snapshot)))
    }

    /// Save `actions` if `changed`, or if an earlier save failed.
    async fn persist(&self, actions: &PendingActions, changed: bool) {
        if !changed && !self.unsaved.load(Ordering::SeqCst) {
            return;
        }
        let result = match serde_json::to_vec(&actions.to_snapshot()) {
            Ok(bytes) => self.slot.set(PENDING_SLOT_KEY, bytes).await,
            Err(e) => Err(Error::QueuePersistence(e.to_string())),
        };
        match result {
            Ok(()) => {
                self.unsaved.store(false, Ordering::SeqCst);
                debug!("Saved pending actions");
            }
            Err(e) => {
                self.unsaved.store(true, Ordering::SeqCst);
                warn!("Failed to save pending actions: {}", e);
            }
        }
    }

    async fn mark(&self, intent: Intent, id: PostId) {
        {
            let mut actions = self.actions.lock().await;
            debug!("Adding pending {} for post: {}", intent, id);
            let changed = actions.mark(intent, id);
            self.persist(&actions, changed).await;
        }
        self.trigger.fire();
    }

    /// Record a favorite intent and wake the coordinator.
    pub async fn mark_favorite_pending(&self, id: PostId) {
        self.mark(Intent::Favorite, id).await;
    }

    /// Record an unfavorite intent and wake the coordinator.
    pub async fn mark_unfavorite_pending(&self, id: PostId) {
        self.mark(Intent::Unfavorite, id).await;
    }

    /// Copy of the current sets.
    pub async fn snapshot(&self) -> PendingActions {
        self.actions.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    /// Remove ids the remote has confirmed.
    pub async fn settle(&self, confirmed: &PendingActions) {
        let mut actions = self.actions.lock().await;
        let changed = actions.settle(confirmed);
        self.persist(&actions, changed).await;
    }

    /// Drop every pending intent.
    pub async fn clear(&self) {
        let mut actions = self.actions.lock().await;
        let changed = actions.clear();
        self.persist(&actions, changed).await;
    }
}
