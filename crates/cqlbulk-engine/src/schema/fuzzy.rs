//! Header-driven column ordering
//!
//! Best effort: each header field is paired with the most similar column
//! name by normalized Levenshtein similarity. Anything ambiguous is an error
//! rather than a guess.

use cqlbulk_common::{BulkError, Result};
use tracing::warn;

/// Matches header fields to column names above a similarity threshold
#[derive(Debug, Clone, Copy)]
pub struct HeaderMatcher {
    threshold: f64,
}

impl HeaderMatcher {
    /// # Arguments
    ///
    /// * `threshold` - Minimum similarity in `[0, 1]`; 1.0 accepts exact matches only
    pub fn new(threshold: f64) -> Self {
        Self { threshold: threshold.clamp(0.0, 1.0) }
    }

    /// Resolves each header field to a column
    ///
    /// # Returns
    ///
    /// Column names in header order. Fails when a field scores below the
    /// threshold, when two columns tie for a field, or when two fields land
    /// on the same column.
    pub fn match_header(&self, header: &[String], columns: &[String]) -> Result<Vec<String>> {
        if header.len() > columns.len() {
            return Err(BulkError::Schema(format!(
                "header has {} fields but the table has {} columns",
                header.len(),
                columns.len()
            )));
        }

        let mut matched: Vec<String> = Vec::with_capacity(header.len());
        for field in header {
            let wanted = field.trim().trim_matches('"').to_lowercase();
            let mut scored: Vec<(f64, &String)> = columns
                .iter()
                .map(|c| (strsim::normalized_levenshtein(&wanted, &c.to_lowercase()), c))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));

            let (score, column) = match scored.as_slice() {
                [] => return Err(BulkError::schema("table has no columns")),
                [best, ..] => *best,
            };
            if score < self.threshold {
                return Err(BulkError::Schema(format!(
                    "header field '{field}' matches no column (best: '{column}' at {score:.2}, threshold {:.2})",
                    self.threshold
                )));
            }
            if let Some((runner_up, other)) = scored.get(1) {
                if *runner_up == score {
                    return Err(BulkError::Schema(format!(
                        "header field '{field}' matches '{column}' and '{other}' equally"
                    )));
                }
            }
            if matched.contains(column) {
                return Err(BulkError::Schema(format!(
                    "header field '{field}' resolves to column '{column}', which is already matched"
                )));
            }
            if score < 1.0 {
                warn!(field = %field, column = %column, score = score, "Inexact header match");
            }
            matched.push(column.clone());
        }
        Ok(matched)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_and_reordered() {
        let matcher = HeaderMatcher::new(1.0);
        let order = matcher
            .match_header(&strings(&["name", " ID "]), &strings(&["id", "name", "tags"]))
            .unwrap();
        assert_eq!(order, strings(&["name", "id"]));
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let matcher = HeaderMatcher::new(0.55);
        let order = matcher
            .match_header(&strings(&["user_nme", "emial"]), &strings(&["user_name", "email", "id"]))
            .unwrap();
        assert_eq!(order, strings(&["user_name", "email"]));
    }

    #[test]
    fn test_rejects_weak_ambiguous_and_duplicate_matches() {
        let matcher = HeaderMatcher::new(0.5);
        let columns = strings(&["alpha", "beta"]);
        assert!(matcher.match_header(&strings(&["zzzzzz"]), &columns).is_err());
        assert!(matcher.match_header(&strings(&["alpha", "alpha"]), &columns).is_err());
        assert!(matcher.match_header(&strings(&["a", "b", "c"]), &columns).is_err());

        let tied = strings(&["ab1", "ab2"]);
        assert!(matcher.match_header(&strings(&["ab"]), &tied).is_err());
    }
}
