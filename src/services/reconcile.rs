//! Candidate reconciliation against the archive ledger

use std::collections::HashSet;

use crate::services::inventory::MediaCandidate;

/// Keep only candidates whose id is not already archived.
///
/// Equality on `id` is the only key. Order of the surviving candidates is
/// preserved, and an id that appears twice in `candidates` is kept once.
pub fn reconcile(
    candidates: Vec<MediaCandidate>,
    existing_ids: &HashSet<String>,
) -> Vec<MediaCandidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| !existing_ids.contains(&c.id))
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str) -> MediaCandidate {
        MediaCandidate {
            id: id.to_string(),
            title: Some(format!("Title {}", id)),
            thumb: None,
            view_count: Some(1),
            added_at: None,
            originally_available_at: None,
            last_viewed_at: None,
            files: vec![format!("/m/{}.mkv", id)],
        }
    }

    fn ids(candidates: &[MediaCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_difference() {
        let result = reconcile(
            vec![candidate("1"), candidate("2"), candidate("3")],
            &set(&["2", "99"]),
        );
        assert_eq!(ids(&result), vec!["1", "3"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reconcile(Vec::new(), &set(&["1"])).is_empty());
        assert!(reconcile(Vec::new(), &HashSet::new()).is_empty());

        let result = reconcile(vec![candidate("1"), candidate("2")], &HashSet::new());
        assert_eq!(ids(&result), vec!["1", "2"]);
    }

    #[test]
    fn test_everything_archived() {
        let result = reconcile(vec![candidate("1"), candidate("2")], &set(&["1", "2"]));
        assert!(result.is_empty());
    }

    #[test]
    fn test_matches_exact_ids_only() {
        let result = reconcile(
            vec![candidate("plex://movie/abc"), candidate("plex://movie/ABC")],
            &set(&["plex://movie/abc "]),
        );
        assert_eq!(ids(&result), vec!["plex://movie/abc", "plex://movie/ABC"]);
    }

    #[test]
    fn test_repeated_candidate_kept_once() {
        let mut second = candidate("7");
        second.files = vec!["/m/other.mkv".to_string()];
        let result = reconcile(vec![candidate("7"), second], &HashSet::new());
        assert_eq!(result, vec![candidate("7")]);
    }
}
