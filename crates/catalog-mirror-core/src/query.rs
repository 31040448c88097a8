//! Lexical query normalization and result-count clamping.
//!
//! User input never reaches FTS5 verbatim. Each whitespace-separated token
//! is wrapped in double quotes (so `-`, `:`, `*`, `AND` and friends are
//! literal text, not query syntax), given a trailing prefix wildcard, and
//! the tokens are joined with spaces, which FTS5 reads as implicit AND.

/// Smallest number of results a search returns.
pub const MIN_LIMIT: i64 = 1;
/// Largest number of results a search returns.
pub const MAX_LIMIT: i64 = 100;

/// Clamp a caller-supplied result count into `MIN_LIMIT..=MAX_LIMIT`.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Build an FTS5 MATCH expression from free text.
///
/// Returns `None` when nothing searchable remains: blank input, or input
/// made only of punctuation (a quoted token with no word characters would
/// match nothing and some FTS5 versions reject it).
///
/// ```
/// use catalog_mirror_core::query::build_match_query;
///
/// assert_eq!(build_match_query("dark choc").as_deref(), Some(r#""dark"* "choc"*"#));
/// assert_eq!(build_match_query("   "), None);
/// ```
pub fn build_match_query(term: &str) -> Option<String> {
    let tokens: Vec<String> = term
        .split_whitespace()
        .filter(|tok| tok.chars().any(char::is_alphanumeric))
        .map(|tok| format!("\"{}\"*", tok.replace('"', "\"\"")))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(-5), 1);
        assert_eq!(clamp_limit(42), 42);
        assert_eq!(clamp_limit(100), 100);
        assert_eq!(clamp_limit(1000), 100);
    }

    #[test]
    fn test_single_token() {
        assert_eq!(build_match_query("Nutella").as_deref(), Some(r#""Nutella"*"#));
    }

    #[test]
    fn test_operators_are_quoted() {
        assert_eq!(
            build_match_query("coca-cola OR NEAR").as_deref(),
            Some(r#""coca-cola"* "OR"* "NEAR"*"#)
        );
    }

    #[test]
    fn test_embedded_quotes_escaped() {
        assert_eq!(
            build_match_query(r#"say"hi"#).as_deref(),
            Some(r#""say""hi"*"#)
        );
    }

    #[test]
    fn test_punctuation_only_tokens_dropped() {
        assert_eq!(build_match_query("- * :").as_deref(), None);
        assert_eq!(build_match_query("milk &").as_deref(), Some(r#""milk"*"#));
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(build_match_query(""), None);
        assert_eq!(build_match_query(" \t\n "), None);
    }
}
