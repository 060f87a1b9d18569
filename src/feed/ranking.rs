use crate::model::Post;

/// Ranks a snapshot of posts: most-liked first, ties going to the more
/// recent post.
///
/// Pure function of its input; safe to call concurrently from any thread.
/// This is a full stable sort over the provided snapshot, not an incremental
/// merge against a previous ranking. A single like-count change means the
/// whole ranked view is recomputed, which is fine at client-side feed sizes.
pub fn rank(posts: &[Post]) -> Vec<Post> {
    let mut ranked = posts.to_vec();
    ranked.sort_by(|left, right| {
        right
            .like_count()
            .cmp(&left.like_count())
            .then_with(|| right.published_date.cmp(&left.published_date))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use url::Url;

    fn post(id: &str, likes: usize, minute: u32) -> Post {
        Post {
            id: Some(id.to_string()),
            text: id.to_string(),
            image_url: None,
            image_reference_id: None,
            published_date: Utc.with_ymd_and_hms(2024, 5, 22, 9, minute, 0).unwrap(),
            liked_ids: (0..likes).map(|n| format!("u{n}")).collect::<BTreeSet<_>>(),
            user_name: "junil".into(),
            user_uid: "ua".into(),
            user_profile_url: Url::parse("https://example.com/a.png").unwrap(),
            location: None,
        }
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().filter_map(|p| p.id.as_deref()).collect()
    }

    #[test]
    fn likes_then_recency() {
        let snapshot = [post("p1", 2, 10), post("p2", 5, 5), post("p3", 5, 20)];
        assert_eq!(ids(&rank(&snapshot)), ["p3", "p2", "p1"]);
    }

    #[test]
    fn output_order_is_monotone() {
        let snapshot = [
            post("a", 0, 1),
            post("b", 3, 9),
            post("c", 3, 9),
            post("d", 1, 30),
            post("e", 7, 2),
        ];
        let ranked = rank(&snapshot);
        for pair in ranked.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            assert!(
                first.like_count() > second.like_count()
                    || (first.like_count() == second.like_count()
                        && first.published_date >= second.published_date)
            );
        }
    }

    #[test]
    fn input_is_untouched_and_reorder_invariant() {
        let snapshot = [post("p1", 1, 1), post("p2", 4, 2), post("p3", 4, 3)];
        let reversed: Vec<Post> = snapshot.iter().rev().cloned().collect();
        assert_eq!(ids(&rank(&snapshot)), ids(&rank(&reversed)));
        assert_eq!(ids(&snapshot), ["p1", "p2", "p3"]);
    }
}
