//! Text processing utilities.

use std::sync::LazyLock;

use regex::Regex;

static NEWLINE_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\r?\n)+").unwrap_or_else(|e| panic!("invalid newline pattern: {e}"))
});

/// Collapse every run of line breaks into a single `\n`.
pub fn collapse_newlines(text: &str) -> String {
    NEWLINE_RUNS.replace_all(text, "\n").into_owned()
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_newlines() {
        assert_eq!(collapse_newlines("a\n\n\nb\r\n\r\nc"), "a\nb\nc");
        assert_eq!(collapse_newlines("no breaks"), "no breaks");
        assert_eq!(collapse_newlines(""), "");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 2), "hé");
        assert_eq!(truncate_chars(&"x".repeat(1500), 1000).len(), 1000);
    }
}
