//! Local store and key-value slot trait definitions.

use async_trait::async_trait;

use postsync_common::{Post, PostId, Result};

/// A persisted post together with its favorite flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPost {
    pub post: Post,
    pub favorite: bool,
}

/// Local post store.
///
/// Owns the authoritative post records and their favorite flags.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or refresh posts by id.
    ///
    /// # Postconditions
    /// - Exactly one record per distinct id
    /// - Content fields of existing ids are refreshed, favorite flags kept
    /// - New ids start with the favorite flag unset
    ///
    /// # Errors
    /// - Persistence failure; the store is left unchanged
    async fn upsert_all(&self, posts: &[Post]) -> Result<()>;

    /// Fetch every post, ordered by id.
    async fn fetch_all(&self) -> Result<Vec<Post>>;

    /// Fetch posts whose favorite flag is set, ordered by id.
    async fn fetch_favorites(&self) -> Result<Vec<Post>>;

    /// Set or clear the favorite flag of a post.
    ///
    /// # Errors
    /// - `NotFound` if no record exists for `id`
    async fn set_favorite(&self, id: PostId, favorite: bool) -> Result<()>;

    /// Insert or refresh `post` with its favorite flag set, as one write.
    ///
    /// # Errors
    /// - Persistence failure; neither the record nor the flag changes
    async fn store_favorite(&self, post: &Post) -> Result<()>;

    /// Count records matching `id == id AND favorite == true` (0 or 1).
    async fn count_favorite(&self, id: PostId) -> Result<usize>;

    /// Look up a single record.
    async fn find(&self, id: PostId) -> Result<Option<StoredPost>>;

    /// Total number of records.
    async fn count(&self) -> Result<usize>;
}

/// Durable key-value slot.
#[async_trait]
pub trait KeyValueSlot: Send + Sync {
    /// Read the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes stored under `key`.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
}
