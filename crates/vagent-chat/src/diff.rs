//! Minimum-edit diff between two chat-context id sequences (§4.7).
//!
//! When the host replaces the chat context, the session computes the
//! longest common subsequence of old and new item ids. Ids in the LCS are
//! untouched; everything else is an explicit remove or an insert anchored
//! to the preceding id in the new sequence, so providers that maintain
//! server-side state can apply the diff incrementally instead of resending
//! the whole context.

use crate::ChatContext;

/// The minimum edit between two chat contexts' id sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatContextDiff {
    /// Ids present in the old context but not the new one.
    pub to_remove: Vec<String>,
    /// New items to insert, as `(anchor_id, new_id)` pairs: `new_id` is
    /// inserted immediately after `anchor_id` (or at the front if `None`).
    /// Pairs are ordered so applying them in sequence reproduces the new
    /// context.
    pub to_create: Vec<(Option<String>, String)>,
}

impl ChatContextDiff {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_create.is_empty()
    }
}

/// Compute the diff between `old` and `new` by longest-common-subsequence
/// over item ids.
pub fn diff(old: &ChatContext, new: &ChatContext) -> ChatContextDiff {
    let old_ids = old.ids();
    let new_ids = new.ids();
    diff_ids(&old_ids, &new_ids)
}

fn diff_ids(old_ids: &[String], new_ids: &[String]) -> ChatContextDiff {
    let lcs_mask_old = lcs_membership(old_ids, new_ids);

    let to_remove: Vec<String> = old_ids
        .iter()
        .zip(lcs_mask_old.iter())
        .filter(|(_, kept)| !**kept)
        .map(|(id, _)| id.clone())
        .collect();

    let kept: std::collections::HashSet<&str> = old_ids
        .iter()
        .zip(lcs_mask_old.iter())
        .filter(|(_, kept)| **kept)
        .map(|(id, _)| id.as_str())
        .collect();

    let mut to_create = Vec::new();
    let mut anchor: Option<String> = None;
    for id in new_ids {
        if kept.contains(id.as_str()) {
            anchor = Some(id.clone());
        } else {
            to_create.push((anchor.clone(), id.clone()));
            anchor = Some(id.clone());
        }
    }

    ChatContextDiff { to_remove, to_create }
}

/// Returns, for each element of `old`, whether it belongs to the LCS of
/// `old` and `new`.
fn lcs_membership(old: &[String], new: &[String]) -> Vec<bool> {
    let n = old.len();
    let m = new.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if old[i] == new[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut mask = vec![false; n];
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if old[i] == new[j] {
            mask[i] = true;
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    mask
}

/// Apply a diff's id-sequence edits to `old_ids`, for testing the
/// round-trip property: `apply(old_ids, diff(old, new)) == new.ids()`.
pub fn apply_ids(old_ids: &[String], diff: &ChatContextDiff) -> Vec<String> {
    let mut result: Vec<String> = old_ids
        .iter()
        .filter(|id| !diff.to_remove.contains(id))
        .cloned()
        .collect();

    for (anchor, new_id) in &diff.to_create {
        let insert_at = match anchor {
            Some(a) => result.iter().position(|id| id == a).map(|p| p + 1).unwrap_or(result.len()),
            None => 0,
        };
        result.insert(insert_at, new_id.clone());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatContext;

    #[test]
    fn empty_diff_when_contexts_equal() {
        let old_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let new_ids = old_ids.clone();
        let d = diff_ids(&old_ids, &new_ids);
        assert!(d.is_empty());
    }

    #[test]
    fn pure_append_has_no_removals() {
        let old_ids = vec!["a".to_string(), "b".to_string()];
        let new_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let d = diff_ids(&old_ids, &new_ids);
        assert!(d.to_remove.is_empty());
        assert_eq!(d.to_create, vec![(Some("b".to_string()), "c".to_string())]);
    }

    #[test]
    fn pure_removal_has_no_creates() {
        let old_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let new_ids = vec!["a".to_string(), "c".to_string()];
        let d = diff_ids(&old_ids, &new_ids);
        assert_eq!(d.to_remove, vec!["b".to_string()]);
        assert!(d.to_create.is_empty());
    }

    #[test]
    fn round_trip_apply_reproduces_new_sequence() {
        let cases: Vec<(Vec<&str>, Vec<&str>)> = vec![
            (vec!["a", "b", "c"], vec!["a", "b", "c"]),
            (vec!["a", "b"], vec!["a", "x", "b"]),
            (vec!["a", "b", "c"], vec!["b", "c"]),
            (vec!["a", "b", "c"], vec!["c", "b", "a"]),
            (vec![], vec!["a", "b"]),
            (vec!["a", "b"], vec![]),
        ];

        for (old, new) in cases {
            let old_ids: Vec<String> = old.into_iter().map(String::from).collect();
            let new_ids: Vec<String> = new.into_iter().map(String::from).collect();
            let d = diff_ids(&old_ids, &new_ids);
            let applied = apply_ids(&old_ids, &d);
            assert_eq!(applied, new_ids, "diff did not reproduce new id sequence");
        }
    }

    #[test]
    fn diff_on_chat_context_values_removes_dropped_item() {
        let mut old = ChatContext::new();
        old.append_system("sys");
        let user_id = old.append_user("hi").id.clone();

        // `new` keeps only the system item and adds a fresh one; the user
        // item has no surviving id, so it must show up as a removal.
        let mut new = ChatContext::new();
        new.append_system("sys");
        new.append_assistant("new turn");

        let d = diff(&old, &new);
        assert!(d.to_remove.contains(&user_id));
    }
}
