//! Remote collaborator for postsync.
//!
//! The core only needs two read operations and an acknowledgment call for
//! favorite intents. Transport and encoding stay behind the traits in
//! [`api`]; [`HttpRemote`] talks to a JSON REST backend and [`MockRemote`]
//! is a deterministic fake for tests.

pub mod api;
pub mod http;
pub mod mock;

pub use api::{PostsApi, SyncTransport};
pub use http::HttpRemote;
pub use mock::MockRemote;
