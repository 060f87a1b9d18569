use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::error::{decode_error, not_found, FeedError, FeedResult};
use crate::model::Post;

use super::{
    Cursor, PageRequest, PageResponse, RemoteStore, WatchEvent, WatchObserver, WatchRegistration,
};

const AUTO_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Remote operations recorded by [`InMemoryStore`], in issue order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    FetchPage,
    SetAdd { id: String, user_uid: String },
    SetRemove { id: String, user_uid: String },
    Delete { id: String },
}

/// Deterministic [`RemoteStore`] over JSON documents keyed by post id.
///
/// Watch events are delivered synchronously on every mutation, so events for
/// one document always arrive in emission order. Test hooks cover the failure
/// modes the core has to survive: fetch fault injection, an operation gate
/// that suspends the next remote call until released, and an operation log.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    documents: Mutex<BTreeMap<String, Value>>,
    listeners: Mutex<HashMap<String, Vec<(u64, WatchObserver)>>>,
    next_listener_id: AtomicU64,
    ops: Mutex<Vec<StoreOp>>,
    fail_next_fetch: Mutex<Option<FeedError>>,
    gate: Mutex<Option<async_channel::Receiver<()>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a post, assigning a store id when it does not have one yet.
    /// Returns the stored post with its identifier filled in.
    pub fn create(&self, post: &Post) -> FeedResult<Post> {
        let mut stored = post.clone();
        let id = match stored.id.clone() {
            Some(id) => id,
            None => auto_id(),
        };
        stored.id = Some(id.clone());
        self.write_document(&id, &stored)?;
        self.inner.notify(&id, WatchEvent::Updated(stored.clone()));
        Ok(stored)
    }

    /// Overwrites an existing post in place and notifies its watchers.
    pub fn upsert(&self, post: &Post) -> FeedResult<()> {
        let id = post
            .id
            .clone()
            .ok_or_else(|| crate::error::invalid_argument("Cannot upsert a post without an id"))?;
        if !self.inner.documents.lock().unwrap().contains_key(&id) {
            return Err(not_found(format!("post {id} does not exist")));
        }
        self.write_document(&id, post)?;
        self.inner.notify(&id, WatchEvent::Updated(post.clone()));
        Ok(())
    }

    /// Current decoded contents of a document, if present and decodable.
    pub fn get(&self, id: &str) -> Option<Post> {
        let documents = self.inner.documents.lock().unwrap();
        documents.get(id).and_then(|value| decode_document(id, value))
    }

    /// Inserts a raw document without validation. Lets tests seed malformed
    /// documents that must be skipped during page decoding.
    pub fn insert_raw(&self, id: &str, value: Value) {
        self.inner
            .documents
            .lock()
            .unwrap()
            .insert(id.to_string(), value);
    }

    /// Fails the next `fetch_page` call with the given error, leaving the
    /// documents untouched.
    pub fn fail_next_fetch(&self, error: FeedError) {
        *self.inner.fail_next_fetch.lock().unwrap() = Some(error);
    }

    /// Suspends the next remote operation until the returned sender fires.
    pub fn hold_next_op(&self) -> async_channel::Sender<()> {
        let (sender, receiver) = async_channel::bounded(1);
        *self.inner.gate.lock().unwrap() = Some(receiver);
        sender
    }

    /// Number of live watch registrations across all documents.
    pub fn active_watch_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Every remote operation issued so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.ops.lock().unwrap().clone()
    }

    fn write_document(&self, id: &str, post: &Post) -> FeedResult<()> {
        let mut value = serde_json::to_value(post)
            .map_err(|err| decode_error(format!("post {id} could not be encoded: {err}")))?;
        if let Some(object) = value.as_object_mut() {
            // The id lives in the document key, not in the document body.
            object.remove("id");
        }
        self.inner
            .documents
            .lock()
            .unwrap()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn await_gate(&self) {
        let receiver = self.inner.gate.lock().unwrap().take();
        if let Some(receiver) = receiver {
            let _ = receiver.recv().await;
        }
    }
}

impl StoreInner {
    fn record(&self, op: StoreOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn notify(&self, id: &str, event: WatchEvent) {
        let observers: Vec<WatchObserver> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .get(id)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(_, observer)| Arc::clone(observer))
                        .collect()
                })
                .unwrap_or_default()
        };
        for observer in observers {
            observer(event.clone());
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn fetch_page(&self, request: &PageRequest) -> FeedResult<PageResponse> {
        self.inner.record(StoreOp::FetchPage);
        self.await_gate().await;
        if let Some(error) = self.inner.fail_next_fetch.lock().unwrap().take() {
            return Err(error);
        }

        let documents = self.inner.documents.lock().unwrap().clone();
        let mut posts: Vec<Post> = documents
            .iter()
            .filter_map(|(id, value)| decode_document(id, value))
            .collect();
        if let Some(author) = &request.author {
            posts.retain(|post| &post.user_uid == author);
        }
        posts.sort_by(|left, right| {
            right
                .published_date
                .cmp(&left.published_date)
                .then_with(|| left.id.cmp(&right.id))
        });

        let start = match &request.after {
            Some(cursor) => {
                match posts
                    .iter()
                    .position(|post| post.id.as_deref() == Some(cursor.token()))
                {
                    Some(index) => index + 1,
                    None => {
                        log::debug!(
                            "page cursor {} no longer present; restarting from the head",
                            cursor.token()
                        );
                        0
                    }
                }
            }
            None => 0,
        };

        let remaining = posts.split_off(start.min(posts.len()));
        let limit = request.limit as usize;
        let has_more = remaining.len() > limit;
        let page: Vec<Post> = remaining.into_iter().take(limit).collect();
        let cursor = page.last().and_then(|post| post.id.clone()).map(Cursor::new);
        Ok(PageResponse {
            posts: page,
            cursor,
            has_more,
        })
    }

    fn watch(&self, id: &str, observer: WatchObserver) -> FeedResult<WatchRegistration> {
        let listener_id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push((listener_id, observer));

        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Ok(WatchRegistration::new(move || {
            let mut listeners = inner.listeners.lock().unwrap();
            if let Some(entries) = listeners.get_mut(&id) {
                entries.retain(|(entry_id, _)| *entry_id != listener_id);
                if entries.is_empty() {
                    listeners.remove(&id);
                }
            }
        }))
    }

    async fn atomic_set_add(&self, id: &str, user_uid: &str) -> FeedResult<()> {
        self.inner.record(StoreOp::SetAdd {
            id: id.to_string(),
            user_uid: user_uid.to_string(),
        });
        self.await_gate().await;
        let snapshot = {
            let mut documents = self.inner.documents.lock().unwrap();
            let value = documents
                .get_mut(id)
                .ok_or_else(|| not_found(format!("post {id} does not exist")))?;
            let members = liked_ids_mut(id, value)?;
            let needle = Value::String(user_uid.to_string());
            if !members.contains(&needle) {
                members.push(needle);
            }
            value.clone()
        };
        if let Some(post) = decode_document(id, &snapshot) {
            self.inner.notify(id, WatchEvent::Updated(post));
        }
        Ok(())
    }

    async fn atomic_set_remove(&self, id: &str, user_uid: &str) -> FeedResult<()> {
        self.inner.record(StoreOp::SetRemove {
            id: id.to_string(),
            user_uid: user_uid.to_string(),
        });
        self.await_gate().await;
        let snapshot = {
            let mut documents = self.inner.documents.lock().unwrap();
            let value = documents
                .get_mut(id)
                .ok_or_else(|| not_found(format!("post {id} does not exist")))?;
            let members = liked_ids_mut(id, value)?;
            members.retain(|member| member != &Value::String(user_uid.to_string()));
            value.clone()
        };
        if let Some(post) = decode_document(id, &snapshot) {
            self.inner.notify(id, WatchEvent::Updated(post));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> FeedResult<()> {
        self.inner.record(StoreOp::Delete { id: id.to_string() });
        self.await_gate().await;
        let removed = self.inner.documents.lock().unwrap().remove(id);
        if removed.is_none() {
            return Err(not_found(format!("post {id} does not exist")));
        }
        self.inner.notify(id, WatchEvent::Deleted);
        Ok(())
    }
}

fn decode_document(id: &str, value: &Value) -> Option<Post> {
    match serde_json::from_value::<Post>(value.clone()) {
        Ok(mut post) => {
            post.id = Some(id.to_string());
            Some(post)
        }
        Err(err) => {
            log::warn!("skipping undecodable post {id}: {err}");
            None
        }
    }
}

fn liked_ids_mut<'a>(id: &str, value: &'a mut Value) -> FeedResult<&'a mut Vec<Value>> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| decode_error(format!("post {id} is not a document")))?;
    object
        .entry("likedIDs")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| decode_error(format!("post {id} has a malformed likedIDs field")))
}

fn auto_id() -> String {
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| AUTO_ID_CHARS[rng.gen_range(0..AUTO_ID_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use url::Url;

    fn sample_post(text: &str, minute: u32) -> Post {
        Post {
            id: None,
            text: text.to_string(),
            image_url: None,
            image_reference_id: None,
            published_date: Utc.with_ymd_and_hms(2024, 5, 22, 9, minute, 0).unwrap(),
            liked_ids: BTreeSet::new(),
            user_name: "junil".into(),
            user_uid: "ua".into(),
            user_profile_url: Url::parse("https://example.com/a.png").unwrap(),
            location: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_pages_in_publish_order() {
        let store = InMemoryStore::new();
        let older = store.create(&sample_post("older", 1)).unwrap();
        let newer = store.create(&sample_post("newer", 2)).unwrap();
        assert!(older.id.is_some());

        let page = store
            .fetch_page(&PageRequest {
                after: None,
                limit: 10,
                author: None,
            })
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].id, newer.id);
        assert_eq!(page.posts[1].id, older.id);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn set_add_is_idempotent() {
        let store = InMemoryStore::new();
        let post = store.create(&sample_post("hello", 1)).unwrap();
        let id = post.id.as_deref().unwrap();
        store.atomic_set_add(id, "ub").await.unwrap();
        store.atomic_set_add(id, "ub").await.unwrap();

        let page = store
            .fetch_page(&PageRequest {
                after: None,
                limit: 10,
                author: None,
            })
            .await
            .unwrap();
        assert_eq!(page.posts[0].like_count(), 1);
    }

    #[tokio::test]
    async fn watch_delivers_updates_until_detached() {
        let store = InMemoryStore::new();
        let post = store.create(&sample_post("hello", 1)).unwrap();
        let id = post.id.clone().unwrap();

        let events: Arc<Mutex<Vec<WatchEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let registration = store
            .watch(&id, Arc::new(move |event| captured.lock().unwrap().push(event)))
            .unwrap();
        assert_eq!(store.active_watch_count(), 1);

        store.atomic_set_add(&id, "ub").await.unwrap();
        registration.detach();
        assert_eq!(store.active_watch_count(), 0);
        store.atomic_set_add(&id, "uc").await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            WatchEvent::Updated(updated) => assert!(updated.liked_by("ub")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_missing_document_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.delete("ghost").await.unwrap_err();
        assert_eq!(err.code_str(), "feed/not-found");
    }
}
