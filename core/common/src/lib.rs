//! Common utilities and types shared across postsync modules.
//!
//! This module provides the record types that flow between the local store,
//! the remote collaborator and the sync machinery, plus the shared error type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Comment, Post, PostId};
