//! Read path: remote read-through with local fallback.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use postsync_common::{Comment, Post, PostId, Result};
use postsync_remote::PostsApi;
use postsync_storage::LocalStore;
use postsync_sync::NetworkObserver;

/// Decides per request whether posts come from the remote or the local store.
///
/// | state                         | force | action                                   |
/// |-------------------------------|-------|------------------------------------------|
/// | posts already loaded          | no    | return the in-memory list                |
/// | connected                     | any   | remote, persist, fall back on failure    |
/// | disconnected                  | any   | local store                              |
pub struct FetchOrchestrator {
    api: Arc<dyn PostsApi>,
    store: Arc<dyn LocalStore>,
    network: Arc<NetworkObserver>,
    posts: watch::Sender<Vec<Post>>,
    last_error: watch::Sender<Option<String>>,
    fetching: Mutex<()>,
}

impl FetchOrchestrator {
    pub fn new(
        api: Arc<dyn PostsApi>,
        store: Arc<dyn LocalStore>,
        network: Arc<NetworkObserver>,
    ) -> Self {
        let (posts, _) = watch::channel(Vec::new());
        let (last_error, _) = watch::channel(None);
        Self {
            api,
            store,
            network,
            posts,
            last_error,
            fetching: Mutex::new(()),
        }
    }

    /// Observable in-memory post list.
    pub fn posts(&self) -> watch::Receiver<Vec<Post>> {
        self.posts.subscribe()
    }

    /// Observable user-visible error from the last read.
    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.last_error.subscribe()
    }

    /// Fetch posts according to the read policy.
    ///
    /// # Errors
    /// - `Persistence` if the remote list could not be stored (the in-memory
    ///   list is left unchanged) or the local fallback read failed
    pub async fn fetch_posts(&self, force_refresh: bool) -> Result<Vec<Post>> {
        let _fetching = self.fetching.lock().await;

        if !force_refresh {
            let loaded = self.posts.borrow();
            if !loaded.is_empty() {
                debug!("Posts already loaded, returning {} cached", loaded.len());
                return Ok(loaded.clone());
            }
        }

        let result = if self.network.is_connected() {
            self.read_through().await
        } else {
            debug!("Offline, loading posts from local store");
            self.store.fetch_all().await
        };

        match result {
            Ok(posts) => {
                self.posts.send_replace(posts.clone());
                Ok(posts)
            }
            Err(e) => {
                self.last_error.send_replace(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn read_through(&self) -> Result<Vec<Post>> {
        match self.api.list_posts().await {
            Ok(fetched) => {
                self.store.upsert_all(&fetched).await?;
                self.last_error.send_replace(None);
                Ok(fetched)
            }
            Err(e) if e.is_remote() => {
                warn!("Remote fetch failed, loading posts from local store: {}", e);
                self.last_error.send_replace(Some(e.to_string()));
                self.store.fetch_all().await
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch comments for a post. Always remote, never cached.
    pub async fn fetch_comments(&self, post_id: PostId) -> Result<Vec<Comment>> {
        self.api.list_comments(post_id).await.inspect_err(|e| {
            self.last_error.send_replace(Some(e.to_string()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postsync_common::Error;
    use postsync_remote::mock::{Failure, MockRemote};
    use postsync_storage::MemoryStore;

    fn posts(ids: &[i64]) -> Vec<Post> {
        ids.iter()
            .map(|&id| Post::new(id, 1, format!("post {}", id), "body"))
            .collect()
    }

    fn orchestrator(
        remote: &MockRemote,
        store: &MemoryStore,
        connected: bool,
    ) -> FetchOrchestrator {
        let network = Arc::new(NetworkObserver::new());
        network.path_update(connected);
        FetchOrchestrator::new(Arc::new(remote.clone()), Arc::new(store.clone()), network)
    }

    #[tokio::test]
    async fn test_online_fetch_persists() {
        let remote = MockRemote::with_posts(posts(&[3, 1, 2]));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);

        let fetched = fetch.fetch_posts(false).await.unwrap();
        let ids: Vec<i64> = fetched.iter().map(|p| p.id.get()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(*fetch.posts().borrow(), fetched);
    }

    #[tokio::test]
    async fn test_loaded_posts_short_circuit() {
        let remote = MockRemote::with_posts(posts(&[1]));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);

        let first = fetch.fetch_posts(false).await.unwrap();
        let reads = store.reads();
        let second = fetch.fetch_posts(false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.list_posts_calls(), 1);
        assert_eq!(store.reads(), reads);
    }

    #[tokio::test]
    async fn test_force_refresh_hits_remote() {
        let remote = MockRemote::with_posts(posts(&[1]));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);

        fetch.fetch_posts(false).await.unwrap();
        remote.set_posts(posts(&[1, 2]));
        let refreshed = fetch.fetch_posts(true).await.unwrap();

        assert_eq!(refreshed.len(), 2);
        assert_eq!(remote.list_posts_calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_store() {
        let remote = MockRemote::new();
        remote.fail_posts(Some(Failure::Transport));
        let store = MemoryStore::new();
        store.upsert_all(&posts(&[5, 6])).await.unwrap();
        let fetch = orchestrator(&remote, &store, true);

        let fetched = fetch.fetch_posts(false).await.unwrap();
        assert_eq!(fetched, posts(&[5, 6]));
        assert!(fetch.last_error().borrow().is_some());
    }

    #[tokio::test]
    async fn test_decode_failure_applies_nothing() {
        let remote = MockRemote::new();
        remote.fail_posts(Some(Failure::Decode));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);

        let fetched = fetch.fetch_posts(true).await.unwrap();
        assert!(fetched.is_empty());
        assert_eq!(store.writes(), 0);
        assert!(fetch.last_error().borrow().as_deref().unwrap().contains("Decode"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory() {
        let remote = MockRemote::with_posts(posts(&[1]));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);
        fetch.fetch_posts(false).await.unwrap();

        remote.set_posts(posts(&[1, 2, 3]));
        store.fail_writes(true);
        let err = fetch.fetch_posts(true).await.unwrap_err();

        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(*fetch.posts().borrow(), posts(&[1]));
    }

    #[tokio::test]
    async fn test_failed_fallback_read_surfaces() {
        let remote = MockRemote::with_posts(posts(&[1]));
        let store = MemoryStore::new();
        let fetch = orchestrator(&remote, &store, true);
        fetch.fetch_posts(false).await.unwrap();

        remote.fail_posts(Some(Failure::Transport));
        store.fail_reads(true);
        let err = fetch.fetch_posts(true).await.unwrap_err();

        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(
            fetch.last_error().borrow().as_deref(),
            Some(err.to_string().as_str())
        );
        assert_eq!(*fetch.posts().borrow(), posts(&[1]));
    }

    #[tokio::test]
    async fn test_offline_reads_store_only() {
        let remote = MockRemote::with_posts(posts(&[9]));
        let store = MemoryStore::new();
        store.upsert_all(&posts(&[1, 2])).await.unwrap();
        let fetch = orchestrator(&remote, &store, false);

        let fetched = fetch.fetch_posts(true).await.unwrap();
        assert_eq!(fetched, posts(&[1, 2]));
        assert_eq!(remote.list_posts_calls(), 0);
    }

    #[tokio::test]
    async fn test_comments_failure_surfaces() {
        let remote = MockRemote::new();
        remote.set_comments(
            PostId::new(1),
            vec![Comment {
                id: 1,
                post_id: PostId::new(1),
                name: "n".to_string(),
                email: "e@x.y".to_string(),
                body: "b".to_string(),
            }],
        );
        let fetch = orchestrator(&remote, &MemoryStore::new(), false);

        assert_eq!(fetch.fetch_comments(PostId::new(1)).await.unwrap().len(), 1);

        remote.fail_comments(Some(Failure::Transport));
        assert!(matches!(
            fetch.fetch_comments(PostId::new(1)).await,
            Err(Error::Transport(_))
        ));
        assert_eq!(remote.list_comments_calls(), 2);
    }
}
