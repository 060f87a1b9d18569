use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::error::FeedResult;
use crate::store::{RemoteStore, WatchEvent, WatchRegistration};

use super::cache::CacheSet;

struct WatchState {
    // Held for its Drop impl; detaching the registration closes the watch.
    _registration: WatchRegistration,
    /// How many visible renderings currently need this watch.
    visible: usize,
}

struct ReconcilerInner {
    store: Arc<dyn RemoteStore>,
    caches: CacheSet,
    watches: Mutex<HashMap<String, WatchState>>,
}

/// Maintains exactly one live store watch per currently visible post and fans
/// incoming update/delete events into every registered [`FeedCache`].
///
/// Watches follow visibility, not fetch history: `on_appear` opens a watch on
/// first appearance, `on_disappear` closes it once nothing on screen renders
/// the post anymore. That bounds live watches to the number of on-screen
/// items no matter how far the user has scrolled.
///
/// [`FeedCache`]: super::FeedCache
pub struct LiveReconciler {
    inner: Arc<ReconcilerInner>,
}

impl LiveReconciler {
    pub fn new(store: Arc<dyn RemoteStore>, caches: CacheSet) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                store,
                caches,
                watches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A rendering of the post became visible. Opens a watch on first
    /// appearance; otherwise only bumps the visibility count.
    pub fn on_appear(&self, id: &str) -> FeedResult<()> {
        {
            let mut watches = self.inner.watches.lock().unwrap();
            if let Some(state) = watches.get_mut(id) {
                state.visible += 1;
                return Ok(());
            }
        }

        // The watch is opened without holding the map lock: a store may
        // deliver an initial snapshot synchronously from `watch`, which
        // re-enters `dispatch`.
        let weak = Arc::downgrade(&self.inner);
        let watched_id = id.to_string();
        let registration = self.inner.store.watch(
            id,
            Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(&watched_id, event);
                }
            }),
        )?;

        let mut watches = self.inner.watches.lock().unwrap();
        match watches.get_mut(id) {
            Some(state) => {
                // Another appearance raced us; keep the existing watch.
                state.visible += 1;
                registration.detach();
            }
            None => {
                watches.insert(
                    id.to_string(),
                    WatchState {
                        _registration: registration,
                        visible: 1,
                    },
                );
            }
        }
        Ok(())
    }

    /// A rendering of the post scrolled away. Closes the watch once no
    /// rendering needs it anymore; no-op for an unknown id.
    pub fn on_disappear(&self, id: &str) {
        let mut watches = self.inner.watches.lock().unwrap();
        if let Some(state) = watches.get_mut(id) {
            state.visible = state.visible.saturating_sub(1);
            if state.visible == 0 {
                watches.remove(id);
            }
        }
    }

    /// Number of post ids with an open watch.
    pub fn active_watches(&self) -> usize {
        self.inner.watches.lock().unwrap().len()
    }
}

impl ReconcilerInner {
    fn dispatch(&self, id: &str, event: WatchEvent) {
        match event {
            WatchEvent::Updated(post) => {
                self.caches.apply_update(&post);
            }
            WatchEvent::Deleted => {
                self.caches.apply_delete(id);
                // The document is gone; keeping the watch open would only
                // leak a registration.
                self.watches.lock().unwrap().remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use url::Url;

    use crate::error::FeedResult;
    use crate::feed::cache::{FeedCache, FeedQuery};
    use crate::model::Post;
    use crate::store::{InMemoryStore, PageRequest, PageResponse, WatchObserver};

    /// Delegates to an in-memory store but reports the current document
    /// synchronously from `watch`, the way Firestore snapshot listeners
    /// deliver an initial snapshot.
    #[derive(Clone)]
    struct InitialSnapshotStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl RemoteStore for InitialSnapshotStore {
        async fn fetch_page(&self, request: &PageRequest) -> FeedResult<PageResponse> {
            self.inner.fetch_page(request).await
        }

        fn watch(&self, id: &str, observer: WatchObserver) -> FeedResult<WatchRegistration> {
            match self.inner.get(id) {
                Some(post) => observer(WatchEvent::Updated(post)),
                None => observer(WatchEvent::Deleted),
            }
            self.inner.watch(id, observer)
        }

        async fn atomic_set_add(&self, id: &str, user_uid: &str) -> FeedResult<()> {
            self.inner.atomic_set_add(id, user_uid).await
        }

        async fn atomic_set_remove(&self, id: &str, user_uid: &str) -> FeedResult<()> {
            self.inner.atomic_set_remove(id, user_uid).await
        }

        async fn delete(&self, id: &str) -> FeedResult<()> {
            self.inner.delete(id).await
        }
    }

    fn seed_post(store: &InMemoryStore) -> Post {
        let post = Post {
            id: None,
            text: "hello".into(),
            image_url: None,
            image_reference_id: None,
            published_date: Utc.with_ymd_and_hms(2024, 5, 22, 9, 0, 0).unwrap(),
            liked_ids: BTreeSet::new(),
            user_name: "junil".into(),
            user_uid: "ua".into(),
            user_profile_url: Url::parse("https://example.com/a.png").unwrap(),
            location: None,
        };
        store.create(&post).unwrap()
    }

    #[tokio::test]
    async fn synchronous_initial_snapshot_is_applied_without_deadlock() {
        let store = InitialSnapshotStore {
            inner: InMemoryStore::new(),
        };
        let post = seed_post(&store.inner);
        let id = post.id.as_deref().unwrap();

        let caches = CacheSet::new();
        let cache = Arc::new(FeedCache::new(Arc::new(store.clone()), FeedQuery::default()));
        caches.register(Arc::clone(&cache));
        cache.load_next_page().await.unwrap();

        // Someone else likes the post after the fetch; with no watch open
        // yet, the cached copy is stale until the initial snapshot lands.
        store.inner.atomic_set_add(id, "ub").await.unwrap();
        assert_eq!(cache.get(id).unwrap().like_count(), 0);

        let reconciler = LiveReconciler::new(Arc::new(store.clone()), caches);
        reconciler.on_appear(id).unwrap();

        assert_eq!(cache.get(id).unwrap().like_count(), 1);
        assert_eq!(reconciler.active_watches(), 1);
    }

    #[tokio::test]
    async fn initial_snapshot_of_a_missing_document_evicts_it() {
        let store = InitialSnapshotStore {
            inner: InMemoryStore::new(),
        };
        let post = seed_post(&store.inner);
        let id = post.id.as_deref().unwrap();

        let caches = CacheSet::new();
        let cache = Arc::new(FeedCache::new(Arc::new(store.clone()), FeedQuery::default()));
        caches.register(Arc::clone(&cache));
        cache.load_next_page().await.unwrap();

        store.inner.delete(id).await.unwrap();
        assert!(cache.contains(id));

        let reconciler = LiveReconciler::new(Arc::new(store.clone()), caches);
        reconciler.on_appear(id).unwrap();
        assert!(!cache.contains(id));
    }
}
