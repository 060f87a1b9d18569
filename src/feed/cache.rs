use std::sync::{Arc, Mutex};

use crate::error::{precondition_failed, FeedErrorCode, FeedResult};
use crate::model::Post;
use crate::store::{Cursor, PageRequest, PageResponse, RemoteStore};

/// Page size of the original client's feed queries.
pub const PAGE_SIZE: u32 = 20;

/// Selects which posts a [`FeedCache`] holds.
#[derive(Clone, Debug, Default)]
pub struct FeedQuery {
    /// When set, only posts authored by this `userUID`.
    pub author: Option<String>,
}

impl FeedQuery {
    pub fn for_author(user_uid: impl Into<String>) -> Self {
        Self {
            author: Some(user_uid.into()),
        }
    }
}

/// What a `load_next_page` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was applied; carries the number of newly appended posts.
    Loaded(usize),
    /// Another fetch was already in flight; nothing was issued.
    AlreadyLoading,
    /// The cursor marks the feed as exhausted; nothing was issued.
    Exhausted,
    /// The fetch completed after a `reset` superseded it; the page was
    /// discarded.
    Stale,
}

enum PageCursor {
    /// Nothing fetched yet; the next load is a first-page fetch.
    Start,
    After(Cursor),
    Exhausted,
}

struct CacheState {
    posts: Vec<Post>,
    cursor: PageCursor,
    fetching: bool,
    generation: u64,
}

/// The ordered in-memory sequence of posts for one feed view, together with
/// its pagination cursor and fetch state.
///
/// Order is owned by fetch order (descending publish time as returned by the
/// store); reconciliation replaces entries in place and never re-sorts. All
/// state lives behind one mutex that is never held across an await.
pub struct FeedCache {
    store: Arc<dyn RemoteStore>,
    query: FeedQuery,
    state: Mutex<CacheState>,
}

impl FeedCache {
    pub fn new(store: Arc<dyn RemoteStore>, query: FeedQuery) -> Self {
        Self {
            store,
            query,
            state: Mutex::new(CacheState {
                posts: Vec::new(),
                cursor: PageCursor::Start,
                fetching: false,
                generation: 0,
            }),
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    /// Fetches and appends the next page. No-op while a fetch is in flight or
    /// after the feed is exhausted. A failed fetch leaves the sequence and
    /// cursor untouched, so the call is fully retryable.
    pub async fn load_next_page(&self) -> FeedResult<LoadOutcome> {
        let (generation, request) = {
            let mut state = self.state.lock().unwrap();
            if state.fetching {
                return Ok(LoadOutcome::AlreadyLoading);
            }
            let after = match &state.cursor {
                PageCursor::Exhausted => return Ok(LoadOutcome::Exhausted),
                PageCursor::Start => None,
                PageCursor::After(cursor) => Some(cursor.clone()),
            };
            state.fetching = true;
            (
                state.generation,
                PageRequest {
                    after,
                    limit: PAGE_SIZE,
                    author: self.query.author.clone(),
                },
            )
        };

        let result = self.store.fetch_page(&request).await;
        match self.apply_page(generation, result) {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.code == FeedErrorCode::PreconditionFailed => {
                log::debug!("{err}");
                Ok(LoadOutcome::Stale)
            }
            Err(err) => Err(err),
        }
    }

    fn apply_page(
        &self,
        generation: u64,
        result: FeedResult<PageResponse>,
    ) -> FeedResult<LoadOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            // A reset raced this fetch; the page belongs to a cache state
            // that no longer exists. The reset already cleared the flag.
            return Err(precondition_failed(format!(
                "discarding page fetch from stale generation {generation}"
            )));
        }
        state.fetching = false;
        let page = result?;

        let mut appended = 0;
        for post in page.posts {
            let Some(id) = post.id.as_deref() else {
                log::warn!("dropping post without an id from page result");
                continue;
            };
            if state.posts.iter().any(|held| held.id.as_deref() == Some(id)) {
                log::debug!("dropping duplicate post {id} from page result");
                continue;
            }
            state.posts.push(post);
            appended += 1;
        }
        state.cursor = if page.has_more {
            match page.cursor {
                Some(cursor) => PageCursor::After(cursor),
                None => PageCursor::Exhausted,
            }
        } else {
            PageCursor::Exhausted
        };
        Ok(LoadOutcome::Loaded(appended))
    }

    /// Clears the sequence, cursor, and flags; the next `load_next_page`
    /// behaves as a first-page fetch. Any fetch still in flight is discarded
    /// when it completes.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.posts.clear();
        state.cursor = PageCursor::Start;
        state.fetching = false;
        state.generation += 1;
    }

    /// Installs an externally supplied ordered sequence, replacing whatever
    /// the cache held. Used for ranked views, whose order comes from the
    /// ranking computation rather than from fetch order. No pagination
    /// cursor applies to such a view: the cache is marked exhausted until
    /// the next `reset`. Duplicate ids are dropped, first occurrence wins.
    pub fn replace_with(&self, posts: Vec<Post>) {
        let mut state = self.state.lock().unwrap();
        state.posts.clear();
        for post in posts {
            let Some(id) = post.id.as_deref() else {
                continue;
            };
            if state.posts.iter().any(|held| held.id.as_deref() == Some(id)) {
                continue;
            }
            state.posts.push(post);
        }
        state.cursor = PageCursor::Exhausted;
        state.fetching = false;
        state.generation += 1;
    }

    /// Replaces the entry with a matching id in place, preserving its
    /// position. No-op when the post is not held here.
    pub fn apply_update(&self, post: &Post) {
        let Some(id) = post.id.as_deref() else {
            return;
        };
        let mut state = self.state.lock().unwrap();
        if let Some(held) = state
            .posts
            .iter_mut()
            .find(|held| held.id.as_deref() == Some(id))
        {
            *held = post.clone();
        }
    }

    /// Removes the entry with that id if present; idempotent.
    pub fn apply_delete(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.posts.retain(|held| held.id.as_deref() != Some(id));
    }

    /// Snapshot of the current ordered sequence.
    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().unwrap().posts.clone()
    }

    pub fn get(&self, id: &str) -> Option<Post> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .find(|held| held.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared registry of the feed caches a client drives. LiveReconciler fans
/// events into every registered cache; LikeCoordinator reads the latest known
/// local state out of them.
#[derive(Clone, Default)]
pub struct CacheSet {
    caches: Arc<Mutex<Vec<Arc<FeedCache>>>>,
}

impl CacheSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cache: Arc<FeedCache>) {
        self.caches.lock().unwrap().push(cache);
    }

    fn snapshot(&self) -> Vec<Arc<FeedCache>> {
        self.caches.lock().unwrap().clone()
    }

    pub fn apply_update(&self, post: &Post) {
        for cache in self.snapshot() {
            cache.apply_update(post);
        }
    }

    pub fn apply_delete(&self, id: &str) {
        for cache in self.snapshot() {
            cache.apply_delete(id);
        }
    }

    /// First cached copy of the post with this id, if any cache holds it.
    pub fn find(&self, id: &str) -> Option<Post> {
        self.snapshot().iter().find_map(|cache| cache.get(id))
    }
}
