//! Query tokenization.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

/// Distinct, lowercased, alphanumeric-only tokens of a query, in a stable
/// order.
pub fn query_tokens(text: &str) -> BTreeSet<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct_and_lowercased() {
        let tokens = query_tokens("How does Add work? ADD numbers!");
        let expected: Vec<&str> = vec!["add", "does", "how", "numbers", "work"];
        assert_eq!(tokens.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn punctuation_splits_tokens() {
        let tokens = query_tokens("store.upsert_file(path)");
        assert!(tokens.contains("store"));
        assert!(tokens.contains("upsert"));
        assert!(tokens.contains("file"));
        assert!(tokens.contains("path"));
    }

    #[test]
    fn empty_and_symbolic_queries_yield_nothing() {
        assert!(query_tokens("").is_empty());
        assert!(query_tokens("??? !!!").is_empty());
    }
}
