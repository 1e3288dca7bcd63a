//! Bounds a history before it is sent to the model.

use crate::types::{approximate_size, MessageRole, Turn};

/// Entry-count and approximate-size bounds for a history.
#[derive(Debug, Clone, Copy)]
pub struct ContextTrimmer {
    pub max_entries: usize,
    pub max_size: usize,
}

impl ContextTrimmer {
    pub fn new(max_entries: usize, max_size: usize) -> Self {
        Self {
            max_entries,
            max_size,
        }
    }

    /// Return the most recent suffix of `history` that fits both bounds.
    ///
    /// Over the entry limit, the oldest entries go first. Over the size
    /// limit, entries are dropped two at a time from the oldest end. When
    /// anything was dropped, leading assistant replies whose query is gone
    /// are dropped too.
    pub fn trim(&self, history: &[Turn]) -> Vec<Turn> {
        let mut start = history.len().saturating_sub(self.max_entries);

        while start < history.len() && approximate_size(&history[start..]) > self.max_size {
            start = (start + 2).min(history.len());
        }

        while start > 0 && history.get(start).is_some_and(|t| t.role == MessageRole::Assistant) {
            start += 1;
        }

        if start > 0 {
            tracing::debug!(
                original = history.len(),
                kept = history.len() - start,
                max_entries = self.max_entries,
                max_size = self.max_size,
                "Trimmed history"
            );
        }

        history[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dialog(pairs: usize) -> Vec<Turn> {
        (0..pairs)
            .flat_map(|i| [Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))])
            .collect()
    }

    #[test]
    fn short_history_untouched() {
        let history = dialog(2);
        let trimmer = ContextTrimmer::new(10, 4000);
        assert_eq!(trimmer.trim(&history), history);
    }

    #[test]
    fn keeps_most_recent_entries() {
        let history = dialog(10);
        let trimmed = ContextTrimmer::new(4, 4000).trim(&history);
        assert_eq!(trimmed, history[16..].to_vec());
        assert_eq!(trimmed[0].content, "q8");
    }

    #[test]
    fn odd_entry_limit_sheds_orphaned_reply() {
        let history = dialog(3);
        let trimmed = ContextTrimmer::new(3, 4000).trim(&history);
        // [a1, q2, a2] would start with a reply to a dropped query
        assert_eq!(trimmed, vec![Turn::user("q2"), Turn::assistant("a2")]);
    }

    #[test]
    fn drops_pairs_while_oversized() {
        let history = vec![
            Turn::user("x".repeat(100)),
            Turn::assistant("y".repeat(100)),
            Turn::user("short"),
            Turn::assistant("reply"),
        ];
        let max_size = approximate_size(&history[2..]);
        let trimmed = ContextTrimmer::new(10, max_size).trim(&history);
        assert_eq!(trimmed, history[2..].to_vec());
    }

    #[test]
    fn returns_empty_when_nothing_fits() {
        let history = vec![Turn::user("x".repeat(500))];
        assert!(ContextTrimmer::new(10, 10).trim(&history).is_empty());
        assert!(ContextTrimmer::new(0, 4000).trim(&dialog(3)).is_empty());
    }

    #[test]
    fn leading_system_summary_is_kept_when_it_fits() {
        let history = vec![Turn::system("summary"), Turn::user("q"), Turn::assistant("a")];
        assert_eq!(ContextTrimmer::new(10, 4000).trim(&history), history);
    }

    #[test]
    fn does_not_mutate_input() {
        let history = dialog(6);
        let before = history.clone();
        let _ = ContextTrimmer::new(2, 20).trim(&history);
        assert_eq!(history, before);
    }

    fn turn_strategy() -> impl Strategy<Value = Turn> {
        (0..3u8, ".{0,40}").prop_map(|(role, content)| match role {
            0 => Turn::user(content),
            1 => Turn::assistant(content),
            _ => Turn::system(content),
        })
    }

    proptest! {
        #[test]
        fn trim_respects_bounds(
            history in prop::collection::vec(turn_strategy(), 0..30),
            max_entries in 0usize..15,
            max_size in 0usize..800,
        ) {
            let trimmed = ContextTrimmer::new(max_entries, max_size).trim(&history);
            prop_assert!(trimmed.len() <= max_entries);
            prop_assert!(trimmed.is_empty() || approximate_size(&trimmed) <= max_size);
        }

        #[test]
        fn trim_keeps_a_suffix_without_orphans(
            history in prop::collection::vec(turn_strategy(), 0..30),
            max_entries in 0usize..15,
            max_size in 0usize..800,
        ) {
            let trimmed = ContextTrimmer::new(max_entries, max_size).trim(&history);
            prop_assert!(history.ends_with(&trimmed));
            if trimmed.len() < history.len() {
                prop_assert!(trimmed.first().map_or(true, |t| t.role != MessageRole::Assistant));
            }
        }
    }
}
