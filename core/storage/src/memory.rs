//! In-memory local store and key-value slot for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use postsync_common::{Error, Post, PostId, Result};

use crate::provider::{KeyValueSlot, LocalStore, StoredPost};

#[derive(Debug, Default)]
struct StoreInner {
    records: Mutex<BTreeMap<PostId, StoredPost>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// In-memory local store.
///
/// Useful for testing. Clones share the same records. Reads and writes can
/// be made to fail, and both are counted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of read operations served so far.
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of write operations attempted so far.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn begin_read(&self) -> Result<()> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Persistence("Injected read failure".to_string()));
        }
        Ok(())
    }

    fn begin_write(&self) -> Result<()> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("Injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn upsert_all(&self, posts: &[Post]) -> Result<()> {
        self.begin_write()?;
        let mut records = self.inner.records.lock().await;
        for post in posts {
            records
                .entry(post.id)
                .and_modify(|stored| stored.post = post.clone())
                .or_insert_with(|| StoredPost {
                    post: post.clone(),
                    favorite: false,
                });
        }
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Post>> {
        self.begin_read()?;
        let records = self.inner.records.lock().await;
        Ok(records.values().map(|s| s.post.clone()).collect())
    }

    async fn fetch_favorites(&self) -> Result<Vec<Post>> {
        self.begin_read()?;
        let records = self.inner.records.lock().await;
        Ok(records
            .values()
            .filter(|s| s.favorite)
            .map(|s| s.post.clone())
            .collect())
    }

    async fn set_favorite(&self, id: PostId, favorite: bool) -> Result<()> {
        self.begin_write()?;
        let mut records = self.inner.records.lock().await;
        match records.get_mut(&id) {
            Some(stored) => {
                stored.favorite = favorite;
                Ok(())
            }
            None => Err(Error::NotFound(format!("Post {} is not stored locally", id))),
        }
    }

    async fn store_favorite(&self, post: &Post) -> Result<()> {
        self.begin_write()?;
        let mut records = self.inner.records.lock().await;
        records.insert(
            post.id,
            StoredPost {
                post: post.clone(),
                favorite: true,
            },
        );
        Ok(())
    }

    async fn count_favorite(&self, id: PostId) -> Result<usize> {
        self.begin_read()?;
        let records = self.inner.records.lock().await;
        Ok(records.get(&id).filter(|s| s.favorite).map_or(0, |_| 1))
    }

    async fn find(&self, id: PostId) -> Result<Option<StoredPost>> {
        self.begin_read()?;
        Ok(self.inner.records.lock().await.get(&id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        self.begin_read()?;
        Ok(self.inner.records.lock().await.len())
    }
}

#[derive(Debug, Default)]
struct SlotInner {
    values: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

/// In-memory key-value slot.
///
/// Clones share the same values, so a slot can outlive the component that
/// wrote it and be handed to a freshly constructed one.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    inner: Arc<SlotInner>,
}

impl MemorySlot {
    /// Create a new empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueSlot for MemorySlot {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::QueuePersistence("Injected read failure".to_string()));
        }
        Ok(self.inner.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::QueuePersistence("Injected write failure".to_string()));
        }
        self.inner
            .values
            .lock()
            .await
            .insert(key.to_string(), value);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
