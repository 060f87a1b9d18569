use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{not_found, FeedErrorCode, FeedResult};
use crate::store::RemoteStore;

use super::cache::CacheSet;

/// What a `toggle_like` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The user was not a member; an atomic set-add was issued.
    Added,
    /// The user was a member; an atomic set-remove was issued.
    Removed,
    /// A toggle for this post was already in flight; this one was dropped.
    Dropped,
}

/// Performs the optimistic, idempotent flip of a user's membership in a
/// post's liked set.
///
/// The direction is decided from the latest known local state, not from a
/// re-fetch. The coordinator never writes `likedIDs` into cached state
/// itself: the authoritative membership arrives as a live `Updated` echo
/// through the reconciler, which is the single writer of that field. At most
/// one toggle per post id is in flight at a time; later taps are dropped.
pub struct LikeCoordinator {
    store: Arc<dyn RemoteStore>,
    caches: CacheSet,
    in_flight: Mutex<HashSet<String>>,
}

impl LikeCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, caches: CacheSet) -> Self {
        Self {
            store,
            caches,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn toggle_like(&self, id: &str, user_uid: &str) -> FeedResult<ToggleOutcome> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(id.to_string()) {
                log::debug!("dropping like toggle for {id}; one is already in flight");
                return Ok(ToggleOutcome::Dropped);
            }
        }
        let result = self.toggle_inner(id, user_uid).await;
        self.in_flight.lock().unwrap().remove(id);
        result
    }

    async fn toggle_inner(&self, id: &str, user_uid: &str) -> FeedResult<ToggleOutcome> {
        let post = self
            .caches
            .find(id)
            .ok_or_else(|| not_found(format!("post {id} is not held by any feed cache")))?;
        let liked = post.liked_by(user_uid);

        let result = if liked {
            self.store.atomic_set_remove(id, user_uid).await
        } else {
            self.store.atomic_set_add(id, user_uid).await
        };
        match result {
            Ok(()) => Ok(if liked {
                ToggleOutcome::Removed
            } else {
                ToggleOutcome::Added
            }),
            Err(err) if err.code == FeedErrorCode::NotFound => {
                // The post vanished between intent and action; reconcile it
                // as a delete everywhere.
                self.caches.apply_delete(id);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
