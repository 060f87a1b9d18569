use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::GeoPoint;

/// A single feed document, carrying the wire field names of the remote
/// `Posts` collection.
///
/// `id` is assigned by the store on first write and never changes afterwards.
/// `liked_ids` is a set: membership is unique by construction and survives a
/// decode of a document that (incorrectly) repeats an entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(rename = "imageURL", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Url>,
    #[serde(
        rename = "imageReferenceID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_reference_id: Option<String>,
    /// Set once at creation; never mutated by reconciliation.
    #[serde(rename = "publishedDate")]
    pub published_date: DateTime<Utc>,
    #[serde(rename = "likedIDs", default)]
    pub liked_ids: BTreeSet<String>,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userUID")]
    pub user_uid: String,
    #[serde(rename = "userProfileURL")]
    pub user_profile_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl Post {
    pub fn like_count(&self) -> usize {
        self.liked_ids.len()
    }

    pub fn liked_by(&self, user_uid: &str) -> bool {
        self.liked_ids.contains(user_uid)
    }
}
