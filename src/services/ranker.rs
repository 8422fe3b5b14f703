//! Listing order for display and notification
//!
//! New-tagged listings come first, then each group is ordered most recent
//! first. Listings whose added time could not be parsed sort last within
//! their group. The sort is stable.

use std::cmp::Ordering;

use crate::indexer::Listing;

/// Return a ranked copy of `listings`
pub fn rank(listings: &[Listing]) -> Vec<Listing> {
    let mut ranked = listings.to_vec();
    ranked.sort_by(compare);
    ranked
}

fn compare(a: &Listing, b: &Listing) -> Ordering {
    b.is_new_tag
        .cmp(&a.is_new_tag)
        .then_with(|| match (a.sort_epoch, b.sort_epoch) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn listing(name: &str, is_new: bool, epoch: Option<i64>) -> Listing {
        let mut l = Listing::new(name).with_new_tag(is_new);
        l.sort_epoch = epoch.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        l
    }

    fn names(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn test_new_tag_first_then_recency() {
        let input = vec![
            listing("old-100", false, Some(100)),
            listing("new-50", true, Some(50)),
            listing("old-200", false, Some(200)),
        ];
        assert_eq!(names(&rank(&input)), vec!["new-50", "old-200", "old-100"]);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = vec![listing("a", false, Some(1)), listing("b", true, Some(2))];
        let _ = rank(&input);
        assert_eq!(names(&input), vec!["a", "b"]);
    }

    #[test]
    fn test_stable_for_equal_keys() {
        let input = vec![
            listing("first", false, Some(10)),
            listing("second", false, Some(10)),
            listing("third", false, Some(10)),
        ];
        assert_eq!(names(&rank(&input)), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unparsed_time_sorts_last_in_group() {
        let input = vec![
            listing("unknown-new", true, None),
            listing("old", false, Some(1)),
            listing("unknown-old", false, None),
            listing("recent-new", true, Some(5)),
        ];
        assert_eq!(
            names(&rank(&input)),
            vec!["recent-new", "unknown-new", "old", "unknown-old"]
        );
    }

    #[test]
    fn test_empty() {
        assert!(rank(&[]).is_empty());
    }
}
