mod in_memory;

pub use in_memory::{InMemoryStore, StoreOp};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FeedResult;
use crate::model::Post;

/// Opaque pagination token referencing the last item of a fetched page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// A range query over posts ordered by descending publish time, starting
/// strictly after `after` when present.
#[derive(Clone, Debug, Default)]
pub struct PageRequest {
    pub after: Option<Cursor>,
    pub limit: u32,
    /// Restricts results to a single author's `userUID`.
    pub author: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PageResponse {
    /// Decoded posts in query order. Documents that failed to decode are
    /// skipped by the store, never reported as page failures.
    pub posts: Vec<Post>,
    /// Token for the last returned item; `None` when the page was empty.
    pub cursor: Option<Cursor>,
    pub has_more: bool,
}

/// A change pushed by the store for a single watched document.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// The document exists and these are its latest contents.
    Updated(Post),
    /// The document no longer exists.
    Deleted,
}

pub type WatchObserver = Arc<dyn Fn(WatchEvent) + Send + Sync + 'static>;

/// RAII watch registration; dropping the handle detaches the underlying
/// watch.
pub struct WatchRegistration {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl WatchRegistration {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn detach(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchRegistration {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The document-store surface the feed core depends on. The wire protocol
/// behind it is out of scope; implementations only promise that set edits are
/// atomic and idempotent and that watch events for one document arrive in
/// emission order.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches one page of posts ordered by `publishedDate` descending.
    async fn fetch_page(&self, request: &PageRequest) -> FeedResult<PageResponse>;

    /// Opens a live watch on a single document. The observer receives every
    /// subsequent change until the registration is dropped or detached.
    fn watch(&self, id: &str, observer: WatchObserver) -> FeedResult<WatchRegistration>;

    /// Atomically adds `user_uid` to the post's `likedIDs` set. Adding a
    /// member that is already present is a no-op on the store side.
    async fn atomic_set_add(&self, id: &str, user_uid: &str) -> FeedResult<()>;

    /// Atomically removes `user_uid` from the post's `likedIDs` set.
    /// Removing an absent member is a no-op on the store side.
    async fn atomic_set_remove(&self, id: &str, user_uid: &str) -> FeedResult<()>;

    /// Deletes the document, notifying watchers.
    async fn delete(&self, id: &str) -> FeedResult<()>;
}
