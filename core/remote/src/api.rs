//! Remote operation traits.

use async_trait::async_trait;

use postsync_common::{Comment, Post, PostId, Result};

/// Read operations against the remote.
#[async_trait]
pub trait PostsApi: Send + Sync {
    /// List all posts in remote order.
    ///
    /// # Errors
    /// - `Transport` if the remote is unreachable or answers with a failure status
    /// - `Decode` if the payload is malformed
    async fn list_posts(&self) -> Result<Vec<Post>>;

    /// List the comments of one post in remote order.
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<Comment>>;
}

/// Acknowledgment calls used to reconcile favorite intents.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Confirm that `id` is a favorite on the remote.
    async fn confirm_favorite(&self, id: PostId) -> Result<()>;

    /// Confirm that `id` is no longer a favorite on the remote.
    async fn confirm_unfavorite(&self, id: PostId) -> Result<()>;
}
