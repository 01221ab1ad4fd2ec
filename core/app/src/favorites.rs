//! Favorite toggling: optimistic local write, then a pending intent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use postsync_common::{Error, Post, PostId, Result};
use postsync_storage::LocalStore;
use postsync_sync::PendingQueue;

/// Favorite operations exposed to the presentation layer.
///
/// The local flag changes immediately; the remote catches up through the
/// pending queue. Toggles and removals run one at a time, so the queue
/// always reflects the last write that completed.
pub struct FavoritesService {
    store: Arc<dyn LocalStore>,
    queue: Arc<PendingQueue>,
    favorites: watch::Sender<Vec<Post>>,
    writes: Mutex<()>,
    load_generation: AtomicU64,
    loading: StdMutex<Option<AbortHandle>>,
}

impl FavoritesService {
    pub fn new(store: Arc<dyn LocalStore>, queue: Arc<PendingQueue>) -> Self {
        let (favorites, _) = watch::channel(Vec::new());
        Self {
            store,
            queue,
            favorites,
            writes: Mutex::new(()),
            load_generation: AtomicU64::new(0),
            loading: StdMutex::new(None),
        }
    }

    /// Observable favorites list, as of the last load or local change.
    pub fn favorites(&self) -> watch::Receiver<Vec<Post>> {
        self.favorites.subscribe()
    }

    /// Whether the local store marks `post_id` as favorite.
    pub async fn is_favorite(&self, post_id: PostId) -> Result<bool> {
        Ok(self.store.count_favorite(post_id).await? > 0)
    }

    /// Flip the favorite flag of `post`.
    ///
    /// # Returns
    /// The new flag.
    ///
    /// # Errors
    /// - `Persistence` if the local write failed; nothing is enqueued
    pub async fn toggle_favorite(&self, post: &Post) -> Result<bool> {
        let _writes = self.writes.lock().await;

        if self.is_favorite(post.id).await? {
            self.store.set_favorite(post.id, false).await?;
            self.queue.mark_unfavorite_pending(post.id).await;
            self.favorites
                .send_modify(|list| list.retain(|p| p.id != post.id));
            info!("Post {} removed from favorites", post.id);
            Ok(false)
        } else {
            self.store.store_favorite(post).await?;
            self.queue.mark_favorite_pending(post.id).await;
            self.favorites.send_modify(|list| {
                if let Err(pos) = list.binary_search_by_key(&post.id, |p| p.id) {
                    list.insert(pos, post.clone());
                }
            });
            info!("Post {} added to favorites", post.id);
            Ok(true)
        }
    }

    /// Clear the favorite flag of `post_id` and reload the favorites.
    ///
    /// A post that is not a favorite is left alone.
    pub async fn remove_favorite(&self, post_id: PostId) -> Result<()> {
        {
            let _writes = self.writes.lock().await;
            if !self.is_favorite(post_id).await? {
                debug!("Post {} is not a favorite, nothing to remove", post_id);
                return Ok(());
            }
            self.store.set_favorite(post_id, false).await?;
            self.queue.mark_unfavorite_pending(post_id).await;
            self.favorites
                .send_modify(|list| list.retain(|p| p.id != post_id));
        }

        match self.load_favorites().await {
            Err(e) if e.is_cancelled() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Load favorites from the local store.
    ///
    /// A newer call supersedes an older one still in flight: the stale task
    /// is aborted and its caller gets `Cancelled`.
    pub async fn load_favorites(&self) -> Result<Vec<Post>> {
        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let store = self.store.clone();
        let task = tokio::spawn(async move { store.fetch_favorites().await });
        let stale = self
            .loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(stale) = stale {
            stale.abort();
        }

        let posts = match task.await {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
            Err(e) => return Err(Error::Persistence(format!("Favorites load failed: {}", e))),
        };

        if self.load_generation.load(Ordering::SeqCst) != generation {
            debug!("Favorites load superseded");
            return Err(Error::Cancelled);
        }
        self.favorites.send_replace(posts.clone());
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postsync_storage::{MemorySlot, MemoryStore, SqliteStore};
    use postsync_sync::{Intent, SyncTrigger};

    async fn service(store: &MemoryStore) -> (FavoritesService, Arc<PendingQueue>) {
        let queue = Arc::new(
            PendingQueue::restore(Arc::new(MemorySlot::new()), SyncTrigger::new()).await,
        );
        (
            FavoritesService::new(Arc::new(store.clone()), queue.clone()),
            queue,
        )
    }

    #[tokio::test]
    async fn test_toggle_sets_flag_then_enqueues() {
        let store = MemoryStore::new();
        let (favorites, queue) = service(&store).await;
        let post = Post::new(42, 1, "t", "b");

        assert!(favorites.toggle_favorite(&post).await.unwrap());
        assert_eq!(store.count_favorite(post.id).await.unwrap(), 1);
        assert!(queue.snapshot().await.contains(Intent::Favorite, post.id));
        assert_eq!(*favorites.favorites().borrow(), vec![post.clone()]);

        assert!(!favorites.toggle_favorite(&post).await.unwrap());
        assert_eq!(store.count_favorite(post.id).await.unwrap(), 0);
        let pending = queue.snapshot().await;
        assert!(pending.contains(Intent::Unfavorite, post.id));
        assert!(!pending.contains(Intent::Favorite, post.id));
        assert!(favorites.favorites().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_failed_local_write_enqueues_nothing() {
        let store = MemoryStore::new();
        let (favorites, queue) = service(&store).await;

        store.fail_writes(true);
        let err = favorites
            .toggle_favorite(&Post::new(1, 1, "t", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(queue.is_empty().await);

        store.fail_writes(false);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(favorites.favorites().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_favorite_leaves_sqlite_store_clean() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("posts.db");
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_favorite BEFORE INSERT ON posts \
             WHEN NEW.is_favorite = 1 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        drop(conn);

        let queue = Arc::new(
            PendingQueue::restore(Arc::new(MemorySlot::new()), SyncTrigger::new()).await,
        );
        let favorites = FavoritesService::new(store.clone(), queue.clone());

        let post = Post::new(9, 1, "t", "b");
        assert!(favorites.toggle_favorite(&post).await.is_err());
        assert!(store.find(post.id).await.unwrap().is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_favorite() {
        let store = MemoryStore::new();
        let (favorites, queue) = service(&store).await;
        let post = Post::new(3, 1, "t", "b");
        favorites.toggle_favorite(&post).await.unwrap();

        favorites.remove_favorite(post.id).await.unwrap();
        assert!(!favorites.is_favorite(post.id).await.unwrap());
        assert!(queue.snapshot().await.contains(Intent::Unfavorite, post.id));
        assert!(favorites.favorites().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_remove_non_favorite_is_noop() {
        let store = MemoryStore::new();
        let (favorites, queue) = service(&store).await;

        favorites.remove_favorite(PostId::new(8)).await.unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_load_favorites() {
        let store = MemoryStore::new();
        store
            .upsert_all(&[Post::new(1, 1, "a", "b"), Post::new(2, 1, "c", "d")])
            .await
            .unwrap();
        store.set_favorite(PostId::new(2), true).await.unwrap();
        let (favorites, _) = service(&store).await;

        let loaded = favorites.load_favorites().await.unwrap();
        assert_eq!(loaded, vec![Post::new(2, 1, "c", "d")]);
        assert_eq!(*favorites.favorites().borrow(), loaded);
    }

    #[tokio::test]
    async fn test_superseded_load_is_cancelled() {
        let store = MemoryStore::new();
        let (favorites, _) = service(&store).await;

        let (a, b) = tokio::join!(favorites.load_favorites(), favorites.load_favorites());
        let cancelled = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_cancelled()))
            .count();
        assert_eq!(cancelled, 1);
        assert!(a.is_ok() || b.is_ok());
    }
}
