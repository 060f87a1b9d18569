mod cache;
mod likes;
mod reconciler;
pub mod ranking;

pub use cache::{CacheSet, FeedCache, FeedQuery, LoadOutcome, PAGE_SIZE};
pub use likes::{LikeCoordinator, ToggleOutcome};
pub use reconciler::LiveReconciler;

use std::sync::Arc;

use crate::error::FeedResult;
use crate::model::Post;
use crate::store::{PageRequest, RemoteStore};

/// The surface the presentation layer talks to: pagination and refresh,
/// visibility hooks, like toggling, ranked views, and read-only observation
/// of the cached sequence.
///
/// Owns the primary (global) feed cache and a ranked view; further feed
/// views (for example a single author's profile feed) can be added with
/// [`add_feed`]. All views share the same reconciler and like coordinator,
/// so live events reach every view holding the post.
///
/// [`add_feed`]: FeedClient::add_feed
pub struct FeedClient {
    store: Arc<dyn RemoteStore>,
    caches: CacheSet,
    feed: Arc<FeedCache>,
    ranked: Arc<FeedCache>,
    reconciler: LiveReconciler,
    likes: LikeCoordinator,
}

impl FeedClient {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let caches = CacheSet::new();
        let feed = Arc::new(FeedCache::new(Arc::clone(&store), FeedQuery::default()));
        caches.register(Arc::clone(&feed));
        let ranked = Arc::new(FeedCache::new(Arc::clone(&store), FeedQuery::default()));
        caches.register(Arc::clone(&ranked));
        let reconciler = LiveReconciler::new(Arc::clone(&store), caches.clone());
        let likes = LikeCoordinator::new(Arc::clone(&store), caches.clone());
        Self {
            store,
            caches,
            feed,
            ranked,
            reconciler,
            likes,
        }
    }

    /// Creates and registers an additional feed view over the same store.
    pub fn add_feed(&self, query: FeedQuery) -> Arc<FeedCache> {
        let cache = Arc::new(FeedCache::new(Arc::clone(&self.store), query));
        self.caches.register(Arc::clone(&cache));
        cache
    }

    /// The primary (global) feed cache.
    pub fn feed(&self) -> &Arc<FeedCache> {
        &self.feed
    }

    /// The ranked view, populated by [`fetch_ranked`]. Registered like any
    /// other feed cache, so live update and delete echoes reach it in place;
    /// re-sorting after a membership change is deferred to the next
    /// [`fetch_ranked`], never performed implicitly.
    ///
    /// [`fetch_ranked`]: FeedClient::fetch_ranked
    pub fn ranked_feed(&self) -> &Arc<FeedCache> {
        &self.ranked
    }

    pub async fn load_next_page(&self) -> FeedResult<LoadOutcome> {
        self.feed.load_next_page().await
    }

    /// Pull-to-refresh: the next load behaves as a first-page fetch.
    pub fn reset(&self) {
        self.feed.reset();
    }

    /// Snapshot of the primary feed's ordered sequence.
    pub fn posts(&self) -> Vec<Post> {
        self.feed.posts()
    }

    pub fn on_appear(&self, id: &str) -> FeedResult<()> {
        self.reconciler.on_appear(id)
    }

    pub fn on_disappear(&self, id: &str) {
        self.reconciler.on_disappear(id)
    }

    pub async fn toggle_like(&self, id: &str, user_uid: &str) -> FeedResult<ToggleOutcome> {
        self.likes.toggle_like(id, user_uid).await
    }

    /// Deletes a post after the author confirmed it. The caches are not
    /// touched here; eviction arrives as the watch `Deleted` echo. The image
    /// referenced by `imageReferenceID`, if any, is the image service
    /// collaborator's to clean up.
    pub async fn delete_post(&self, id: &str) -> FeedResult<()> {
        self.store.delete(id).await
    }

    /// Materializes the full remote corpus (paging until exhaustion, no
    /// persistent cursor), ranks it by like count and recency, and installs
    /// the result into [`ranked_feed`]. Ranking is a secondary
    /// transformation over synced data; the ranked view keeps no cursor.
    ///
    /// [`ranked_feed`]: FeedClient::ranked_feed
    pub async fn fetch_ranked(&self) -> FeedResult<Vec<Post>> {
        let mut snapshot: Vec<Post> = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .store
                .fetch_page(&PageRequest {
                    after,
                    limit: PAGE_SIZE,
                    author: None,
                })
                .await?;
            for post in page.posts {
                if snapshot
                    .iter()
                    .any(|held| held.id.is_some() && held.id == post.id)
                {
                    continue;
                }
                snapshot.push(post);
            }
            if !page.has_more {
                break;
            }
            after = page.cursor;
        }
        let ranked = ranking::rank(&snapshot);
        self.ranked.replace_with(ranked.clone());
        Ok(ranked)
    }

    /// Number of post ids with an open live watch.
    pub fn active_watches(&self) -> usize {
        self.reconciler.active_watches()
    }
}
