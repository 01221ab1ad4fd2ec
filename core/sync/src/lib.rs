//! postsync sync engine
//!
//! This module reconciles user favorite intents with the remote, including:
//! - A network observer publishing every connectivity transition
//! - A durable pending-action queue that survives restarts
//! - An event-driven coordinator that runs one reconciliation pass at a time
//! - A TCP probe standing in for the platform path monitor

pub mod coordinator;
pub mod network;
pub mod probe;
pub mod queue;
pub mod trigger;

// Re-export main types
pub use coordinator::{CoordinatorStatus, PassOutcome, SyncCoordinator, SyncPhase, SyncReport};
pub use network::{ConnectivityState, NetworkObserver, PathMonitor};
pub use probe::TcpProbe;
pub use queue::{Intent, PendingActions, PendingQueue, PENDING_SLOT_KEY};
pub use trigger::SyncTrigger;
