//! Term extraction for full-text fields
//!
//! Trait text and match queries go through the same function, so a query term
//! can only hit a posting if both were cut the same way. A term is a maximal
//! run of alphanumeric characters, lowercased, at least two characters long.

use rustc_hash::FxHashSet;

/// Terms of `text`, in order of appearance, repeats included
///
/// ```
/// use exocore_search::tokenize;
///
/// assert_eq!(tokenize("Buy milk & 2 eggs"), vec!["buy", "milk", "eggs"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= 2)
        .map(String::from)
        .collect()
}

/// Distinct terms of `text`, first occurrence wins
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = FxHashSet::default();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
