//! Canonical text form used for every phrase comparison.
//!
//! Skill phrases are normalized when indexed and transcripts when matched,
//! through the same function, so equal inputs always compare equal.

use once_cell::sync::Lazy;
use regex::Regex;

/// Unicode punctuation and symbols. Letters, digits, combining marks and
/// format characters pass through untouched.
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{P}\p{S}]+").expect("punctuation pattern is valid"));

/// Letter variants folded to their base form after lowercasing.
const FOLDS: &[(char, char)] = &[('ё', 'е')];

/// Lowercase, fold variants, drop punctuation/symbols, collapse whitespace.
///
/// ```
/// use herald_core::text::normalize;
/// assert_eq!(normalize("Джарвис, открой браузер."), "джарвис открой браузер");
/// ```
pub fn normalize(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let folded: String = input.chars().flat_map(char::to_lowercase).map(fold).collect();
    PUNCTUATION
        .replace_all(&folded, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold(c: char) -> char {
    FOLDS
        .iter()
        .find(|(from, _)| *from == c)
        .map_or(c, |(_, to)| *to)
}
