//! postsync application layer
//!
//! Wires the local store, the remote, the network observer, the pending
//! queue and the sync coordinator into one [`App`] that the presentation
//! layer (the CLI) drives.
//!
//! # Startup order
//! 1. Open the store and restore the pending queue
//! 2. Start the coordinator, subscribed to connectivity transitions
//! 3. Start the path monitor; the first transition to connected
//!    reconciles whatever was restored

pub mod config;
pub mod favorites;
pub mod fetch;

pub use config::{default_config_path, AppConfig, ProbeConfig};
pub use favorites::FavoritesService;
pub use fetch::FetchOrchestrator;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use postsync_common::{Comment, Error, Post, PostId, Result};
use postsync_remote::{HttpRemote, PostsApi, SyncTransport};
use postsync_storage::{KeyValueSlot, LocalStore, SqliteStore};
use postsync_sync::{
    CoordinatorStatus, NetworkObserver, PathMonitor, PendingActions, PendingQueue,
    SyncCoordinator, SyncReport, SyncTrigger, TcpProbe,
};

/// Collaborators an [`App`] is assembled from.
pub struct AppParts {
    pub store: Arc<dyn LocalStore>,
    pub slot: Arc<dyn KeyValueSlot>,
    pub api: Arc<dyn PostsApi>,
    pub transport: Arc<dyn SyncTransport>,
    pub network: Arc<NetworkObserver>,
}

/// The running offline-first subsystem.
pub struct App {
    store: Arc<dyn LocalStore>,
    network: Arc<NetworkObserver>,
    queue: Arc<PendingQueue>,
    coordinator: SyncCoordinator,
    fetch: FetchOrchestrator,
    favorites: FavoritesService,
    monitor: CancellationToken,
}

impl App {
    /// Assemble an app from explicit collaborators.
    ///
    /// Connectivity is whatever `parts.network` reports; nothing drives it.
    pub async fn from_parts(parts: AppParts) -> Self {
        let trigger = SyncTrigger::new();
        let queue = Arc::new(PendingQueue::restore(parts.slot, trigger.clone()).await);
        let coordinator = SyncCoordinator::start(
            queue.clone(),
            parts.transport,
            parts.network.clone(),
            trigger,
        );
        let fetch = FetchOrchestrator::new(parts.api, parts.store.clone(), parts.network.clone());
        let favorites = FavoritesService::new(parts.store.clone(), queue.clone());

        Self {
            store: parts.store,
            network: parts.network,
            queue,
            coordinator,
            fetch,
            favorites,
            monitor: CancellationToken::new(),
        }
    }

    /// Open the app described by `config`.
    ///
    /// # Preconditions
    /// - Must be called from within a tokio runtime
    ///
    /// # Errors
    /// - `Persistence` if the database cannot be opened
    /// - `InvalidInput` if the API base URL is invalid
    pub async fn open(config: &AppConfig) -> Result<Self> {
        info!("Opening store at {}", config.database_path.display());
        let sqlite = Arc::new(SqliteStore::open(&config.database_path)?);
        let remote = Arc::new(HttpRemote::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);

        let app = Self::from_parts(AppParts {
            store: sqlite.clone(),
            slot: sqlite,
            api: remote.clone(),
            transport: remote,
            network: Arc::new(NetworkObserver::new()),
        })
        .await;

        if config.offline {
            info!("Offline mode, network monitoring disabled");
        } else {
            let probe = TcpProbe::new(
                &config.probe.host,
                config.probe.port,
                config.probe.interval(),
                config.probe.timeout(),
            );
            app.start_monitor(probe).await;
        }

        Ok(app)
    }

    /// Apply the first update from `monitor`, then keep feeding it in the
    /// background until shutdown.
    pub async fn start_monitor<M: PathMonitor + 'static>(&self, mut monitor: M) {
        if let Some(connected) = monitor.next_update().await {
            self.network.path_update(connected);
        }

        let network = self.network.clone();
        let cancel = self.monitor.clone();
        tokio::spawn(async move { network.run_monitor(monitor, cancel).await });
    }

    /// Observable in-memory post list.
    pub fn posts(&self) -> watch::Receiver<Vec<Post>> {
        self.fetch.posts()
    }

    /// Observable user-visible error from the last read.
    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.fetch.last_error()
    }

    /// Observable favorites list.
    pub fn favorites(&self) -> watch::Receiver<Vec<Post>> {
        self.favorites.favorites()
    }

    /// Observable connectivity.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.network.watch()
    }

    /// Observable coordinator phase and pass history.
    pub fn sync_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.coordinator.status()
    }

    pub async fn fetch_posts(&self, force_refresh: bool) -> Result<Vec<Post>> {
        self.fetch.fetch_posts(force_refresh).await
    }

    pub async fn fetch_comments(&self, post_id: PostId) -> Result<Vec<Comment>> {
        self.fetch.fetch_comments(post_id).await
    }

    /// Resolve a post by id from the loaded list, then the local store.
    ///
    /// # Errors
    /// - `NotFound` if neither holds the post
    pub async fn post(&self, post_id: PostId) -> Result<Post> {
        let loaded = self
            .fetch
            .posts()
            .borrow()
            .iter()
            .find(|p| p.id == post_id)
            .cloned();
        if let Some(post) = loaded {
            return Ok(post);
        }

        self.store
            .find(post_id)
            .await?
            .map(|stored| stored.post)
            .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))
    }

    pub async fn toggle_favorite(&self, post: &Post) -> Result<bool> {
        self.favorites.toggle_favorite(post).await
    }

    pub async fn remove_favorite(&self, post_id: PostId) -> Result<()> {
        self.favorites.remove_favorite(post_id).await
    }

    pub async fn load_favorites(&self) -> Result<Vec<Post>> {
        self.favorites.load_favorites().await
    }

    pub async fn is_favorite(&self, post_id: PostId) -> Result<bool> {
        self.favorites.is_favorite(post_id).await
    }

    /// Intents not yet confirmed by the remote.
    pub async fn pending(&self) -> PendingActions {
        self.queue.snapshot().await
    }

    /// Run a reconciliation pass and wait for its report.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.coordinator.sync_now().await
    }

    /// Stop the monitor and the coordinator.
    pub async fn shutdown(&self) {
        debug!("Shutting down");
        self.monitor.cancel();
        self.coordinator.shutdown().await;
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.monitor.cancel();
    }
}
