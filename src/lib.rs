//! Client-side feed synchronization core for a places-based social feed.
//!
//! Keeps a locally observable, ordered collection of posts consistent with a
//! remote document store that supports paginated range queries, per-document
//! live watches, and atomic set-valued field edits. The store itself is an
//! external collaborator behind the [`store::RemoteStore`] trait; rendering,
//! image upload, place search, and authentication live outside this crate and
//! only forward user intents into the [`feed::FeedClient`] surface.

pub mod error;
pub mod feed;
pub mod model;
pub mod store;

pub use error::{FeedError, FeedErrorCode, FeedResult};
pub use feed::{
    ranking::rank, FeedCache, FeedClient, FeedQuery, LikeCoordinator, LiveReconciler, LoadOutcome,
    ToggleOutcome, PAGE_SIZE,
};
pub use model::{GeoPoint, Post};
pub use store::{
    Cursor, InMemoryStore, PageRequest, PageResponse, RemoteStore, StoreOp, WatchEvent,
    WatchRegistration,
};
