//! Mock remote for testing.
//!
//! Serves scripted posts and comments, fails on demand, and records every
//! acknowledgment so tests can assert on exactly what reached the remote.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Semaphore};

use postsync_common::{Comment, Error, Post, PostId, Result};

use crate::api::{PostsApi, SyncTransport};

/// Kind of failure a scripted read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transport,
    Decode,
}

impl Failure {
    fn into_error(self, what: &str) -> Error {
        match self {
            Failure::Transport => Error::Transport(format!("mock {} unreachable", what)),
            Failure::Decode => Error::Decode(format!("mock {} payload malformed", what)),
        }
    }
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    posts: Vec<Post>,
    comments: HashMap<PostId, Vec<Comment>>,
    posts_failure: Option<Failure>,
    comments_failure: Option<Failure>,
    failing_ids: HashSet<PostId>,
    list_posts_calls: usize,
    list_comments_calls: usize,
    confirmations: Vec<(PostId, bool)>,
    gate: Option<Arc<Semaphore>>,
}

/// Deterministic remote for testing.
///
/// Clones share state, so one handle can be injected while the test keeps
/// another for scripting and assertions.
#[derive(Debug, Clone)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
    attempts: Arc<watch::Sender<usize>>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Create a mock with no posts.
    pub fn new() -> Self {
        let (attempts, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(MockRemoteInner::default())),
            attempts: Arc::new(attempts),
        }
    }

    /// Create a mock serving `posts`.
    pub fn with_posts(posts: Vec<Post>) -> Self {
        let mock = Self::new();
        mock.set_posts(posts);
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockRemoteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the posts returned by `list_posts`.
    pub fn set_posts(&self, posts: Vec<Post>) {
        self.state().posts = posts;
    }

    /// Set the comments returned for one post.
    pub fn set_comments(&self, post_id: PostId, comments: Vec<Comment>) {
        self.state().comments.insert(post_id, comments);
    }

    /// Make `list_posts` fail, or succeed again with `None`.
    pub fn fail_posts(&self, failure: Option<Failure>) {
        self.state().posts_failure = failure;
    }

    /// Make `list_comments` fail, or succeed again with `None`.
    pub fn fail_comments(&self, failure: Option<Failure>) {
        self.state().comments_failure = failure;
    }

    /// Make acknowledgments for `id` fail until cleared.
    pub fn fail_confirmations_for(&self, id: PostId) {
        self.state().failing_ids.insert(id);
    }

    /// Let acknowledgments for `id` succeed again.
    pub fn clear_confirmation_failure(&self, id: PostId) {
        self.state().failing_ids.remove(&id);
    }

    /// Block acknowledgments until permits are released.
    pub fn hold_confirmations(&self) {
        self.state().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held acknowledgments proceed.
    pub fn release_confirmations(&self, n: usize) {
        if let Some(gate) = self.state().gate.clone() {
            gate.add_permits(n);
        }
    }

    /// Number of `list_posts` calls so far.
    pub fn list_posts_calls(&self) -> usize {
        self.state().list_posts_calls
    }

    /// Number of `list_comments` calls so far.
    pub fn list_comments_calls(&self) -> usize {
        self.state().list_comments_calls
    }

    /// Successful acknowledgments in arrival order, as `(id, favorite)`.
    pub fn confirmations(&self) -> Vec<(PostId, bool)> {
        self.state().confirmations.clone()
    }

    /// Watch the number of acknowledgment attempts that have started.
    pub fn attempts(&self) -> watch::Receiver<usize> {
        self.attempts.subscribe()
    }

    async fn confirm(&self, id: PostId, favorite: bool) -> Result<()> {
        self.attempts.send_modify(|n| *n += 1);

        let gate = self.state().gate.clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::Transport("mock gate closed".to_string()))?;
            permit.forget();
        }

        let mut state = self.state();
        if state.failing_ids.contains(&id) {
            return Err(Error::Transport(format!("mock rejected post {}", id)));
        }
        state.confirmations.push((id, favorite));
        Ok(())
    }
}

#[async_trait]
impl PostsApi for MockRemote {
    async fn list_posts(&self) -> Result<Vec<Post>> {
        let mut state = self.state();
        state.list_posts_calls += 1;
        match state.posts_failure {
            Some(failure) => Err(failure.into_error("posts")),
            None => Ok(state.posts.clone()),
        }
    }

    async fn list_comments(&self, post_id: PostId) -> Result<Vec<Comment>> {
        let mut state = self.state();
        state.list_comments_calls += 1;
        match state.comments_failure {
            Some(failure) => Err(failure.into_error("comments")),
            None => Ok(state.comments.get(&post_id).cloned().unwrap_or_default()),
        }
    }
}

#[async_trait]
impl SyncTransport for MockRemote {
    async fn confirm_favorite(&self, id: PostId) -> Result<()> {
        self.confirm(id, true).await
    }

    async fn confirm_unfavorite(&self, id: PostId) -> Result<()> {
        self.confirm(id, false).await
    }
}
