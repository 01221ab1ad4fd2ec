//! SQLite-backed local store.
//!
//! A dedicated worker thread owns the connection. Async callers hand it jobs
//! over a channel and await the reply, so reads and writes never interleave
//! on the underlying database.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use postsync_common::{Error, Post, PostId, Result};

use crate::provider::{KeyValueSlot, LocalStore, StoredPost};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    is_favorite INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_posts_favorite ON posts(is_favorite);

CREATE TABLE IF NOT EXISTS kv_slots (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

fn persistence(e: rusqlite::Error) -> Error {
    Error::Persistence(e.to_string())
}

fn queue_persistence(e: rusqlite::Error) -> Error {
    Error::QueuePersistence(e.to_string())
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: PostId::new(row.get(0)?),
        user_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
    })
}

/// Local store persisted in a SQLite database.
pub struct SqliteStore {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or schema initialization failure
    /// - Worker thread could not be spawned
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(persistence)?;
        info!("Local store opened at {}", db_path.display());
        Self::start(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        Self::start(conn)
    }

    fn start(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;

        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name("postsync-store".to_string())
            .spawn(move || {
                let mut conn = conn;
                while let Some(job) = rx.blocking_recv() {
                    job(&mut conn);
                }
                debug!("Local store worker stopped");
            })?;

        Ok(Self { jobs })
    }

    /// Run `f` on the worker thread and wait for its result.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            let _ = reply_tx.send(f(conn));
        });
        self.jobs
            .send(job)
            .map_err(|_| Error::Persistence("Store worker not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Persistence("Store worker dropped the request".to_string()))?
    }

    async fn query_posts(&self, sql: &'static str) -> Result<Vec<Post>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(sql).map_err(persistence)?;
            let rows = stmt.query_map([], row_to_post).map_err(persistence)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(persistence)
        })
        .await
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn upsert_all(&self, posts: &[Post]) -> Result<()> {
        let posts = posts.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction().map_err(persistence)?;
            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO posts (id, user_id, title, body)
                        VALUES (?1, ?2, ?3, ?4)
                        ON CONFLICT(id) DO UPDATE SET
                            user_id = excluded.user_id,
                            title = excluded.title,
                            body = excluded.body
                        "#,
                    )
                    .map_err(persistence)?;
                for post in &posts {
                    stmt.execute(params![post.id.get(), post.user_id, post.title, post.body])
                        .map_err(persistence)?;
                }
            }
            tx.commit().map_err(persistence)?;
            debug!("Upserted {} posts", posts.len());
            Ok(())
        })
        .await
    }

    async fn fetch_all(&self) -> Result<Vec<Post>> {
        self.query_posts("SELECT id, user_id, title, body FROM posts ORDER BY id")
            .await
    }

    async fn fetch_favorites(&self) -> Result<Vec<Post>> {
        self.query_posts(
            "SELECT id, user_id, title, body FROM posts WHERE is_favorite = 1 ORDER BY id",
        )
        .await
    }

    async fn set_favorite(&self, id: PostId, favorite: bool) -> Result<()> {
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE posts SET is_favorite = ?2 WHERE id = ?1",
                    params![id.get(), favorite as i32],
                )
                .map_err(persistence)?;
            if changed == 0 {
                return Err(Error::NotFound(format!("Post {} is not stored locally", id)));
            }
            Ok(())
        })
        .await
    }

    async fn store_favorite(&self, post: &Post) -> Result<()> {
        let post = post.clone();
        self.call(move |conn| {
            conn.execute(
                r#"
                INSERT INTO posts (id, user_id, title, body, is_favorite)
                VALUES (?1, ?2, ?3, ?4, 1)
                ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    title = excluded.title,
                    body = excluded.body,
                    is_favorite = 1
                "#,
                params![post.id.get(), post.user_id, post.title, post.body],
            )
            .map_err(persistence)?;
            debug!("Stored favorite post {}", post.id);
            Ok(())
        })
        .await
    }

    async fn count_favorite(&self, id: PostId) -> Result<usize> {
        self.call(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM posts WHERE id = ?1 AND is_favorite = 1",
                    [id.get()],
                    |row| row.get(0),
                )
                .map_err(persistence)?;
            Ok(count as usize)
        })
        .await
    }

    async fn find(&self, id: PostId) -> Result<Option<StoredPost>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, user_id, title, body, is_favorite FROM posts WHERE id = ?1",
                [id.get()],
                |row| {
                    Ok(StoredPost {
                        post: row_to_post(row)?,
                        favorite: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(persistence)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.call(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
                .map_err(persistence)?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl KeyValueSlot for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT value FROM kv_slots WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(queue_persistence)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_slots (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(queue_persistence)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn posts(ids: &[i64]) -> Vec<Post> {
        ids.iter()
            .map(|&id| Post::new(id, 1, format!("title {}", id), "body"))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_does_not_duplicate() {
        let store = SqliteStore::in_memory().unwrap();

        store.upsert_all(&posts(&[1, 2, 3])).await.unwrap();
        store.upsert_all(&posts(&[2, 3, 4])).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 4);
        let ids: Vec<i64> = store
            .fetch_all()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id.get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_upsert_keeps_favorite_flag() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_all(&posts(&[7])).await.unwrap();
        store.set_favorite(PostId::new(7), true).await.unwrap();

        let mut refreshed = posts(&[7]);
        refreshed[0].title = "edited".to_string();
        store.upsert_all(&refreshed).await.unwrap();

        let stored = store.find(PostId::new(7)).await.unwrap().unwrap();
        assert!(stored.favorite);
        assert_eq!(stored.post.title, "edited");
    }

    #[tokio::test]
    async fn test_favorites_query() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_all(&posts(&[1, 2, 3])).await.unwrap();
        store.set_favorite(PostId::new(3), true).await.unwrap();
        store.set_favorite(PostId::new(1), true).await.unwrap();
        store.set_favorite(PostId::new(1), false).await.unwrap();

        let favorites = store.fetch_favorites().await.unwrap();
        assert_eq!(favorites, posts(&[3]));
        assert_eq!(store.count_favorite(PostId::new(3)).await.unwrap(), 1);
        assert_eq!(store.count_favorite(PostId::new(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_favorite_inserts_and_refreshes() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_all(&posts(&[1])).await.unwrap();

        let mut edited = posts(&[1]).remove(0);
        edited.title = "edited".to_string();
        store.store_favorite(&edited).await.unwrap();
        store.store_favorite(&posts(&[2])[0]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let stored = store.find(PostId::new(1)).await.unwrap().unwrap();
        assert!(stored.favorite);
        assert_eq!(stored.post.title, "edited");
        assert_eq!(store.count_favorite(PostId::new(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_favorite_leaves_no_record() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("posts.db");
        let store = SqliteStore::open(&db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TRIGGER reject_favorite BEFORE INSERT ON posts
            WHEN NEW.is_favorite = 1
            BEGIN
                SELECT RAISE(ABORT, 'rejected');
            END;
            "#,
        )
        .unwrap();
        drop(conn);

        let err = store.store_favorite(&posts(&[5])[0]).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.find(PostId::new(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_favorite_unknown_post() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.set_favorite(PostId::new(99), true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_slot_roundtrip_and_overwrite() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("pending").await.unwrap().is_none());

        store.set("pending", b"one".to_vec()).await.unwrap();
        store.set("pending", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("pending").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("posts.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_all(&posts(&[5])).await.unwrap();
            store.set_favorite(PostId::new(5), true).await.unwrap();
            store.set("pending", b"{}".to_vec()).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.fetch_favorites().await.unwrap(), posts(&[5]));
        assert_eq!(store.get("pending").await.unwrap(), Some(b"{}".to_vec()));
    }
}
