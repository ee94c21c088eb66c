//! Directive extraction from free-form message bodies.
//!
//! A body carries one or more blocks of the form:
//!
//! ```text
//! Database: orders
//! Query:
//! SELECT * FROM t;
//! ```
//!
//! Each query runs until the next `Database:` line or the end of the body.
//! Pure string parsing, no I/O.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::Directive;

/// Signature/footer markers. Everything from a marker onward is dropped.
pub const FOOTER_MARKERS: [&str; 3] = ["Thanks", "Regards", "--"];

/// `Database: <name> Query:` header, ending at the newline before the query.
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Database:\s*(\w+)\s*Query:\s*\n").unwrap());

/// Start of the next block.
static NEXT_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\nDatabase:").unwrap());

/// Extract the ordered directives from a message body.
///
/// Malformed blocks (empty database or empty query after trimming) are
/// dropped. A body without any block yields an empty vec.
pub fn extract(body: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    let mut pos = 0;

    while let Some(caps) = HEADER.captures_at(body, pos) {
        let (Some(header), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let start = header.end();
        let end = NEXT_BLOCK
            .find_at(body, start)
            .map_or(body.len(), |m| m.start());
        pos = end;

        let query = strip_footer(body[start..end].trim());
        match Directive::new(name.as_str(), query) {
            Some(directive) => directives.push(directive),
            None => debug!(
                database = name.as_str(),
                "Dropping directive with empty database or query"
            ),
        }
    }

    directives
}

/// Cut the query at each footer marker in turn.
///
/// Every cut keeps the text before the marker's first occurrence in what the
/// previous cut left, so the result is always a prefix of the input.
pub fn strip_footer(query: &str) -> &str {
    let mut remaining = query;
    for marker in FOOTER_MARKERS {
        if let Some(idx) = remaining.find(marker) {
            remaining = &remaining[..idx];
        }
    }
    remaining.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(directives: &[Directive]) -> Vec<(&str, &str)> {
        directives
            .iter()
            .map(|d| (d.database.as_str(), d.query.as_str()))
            .collect()
    }

    #[test]
    fn extracts_two_blocks_in_order() {
        let body = "Database: orders\nQuery:\nSELECT * FROM t;\nThanks\nDatabase: billing\nQuery:\nUPDATE t SET x=1;\n";
        let directives = extract(body);
        assert_eq!(
            pairs(&directives),
            vec![("orders", "SELECT * FROM t;"), ("billing", "UPDATE t SET x=1;")]
        );
    }

    #[test]
    fn extraction_is_repeatable() {
        let body = "Hi team,\n\nDatabase: a\nQuery:\nSELECT 1;\nDatabase: b\nQuery:\nSELECT 2;\n\nRegards,\nAlice";
        assert_eq!(extract(body), extract(body));
        assert_eq!(pairs(&extract(body)), vec![("a", "SELECT 1;"), ("b", "SELECT 2;")]);
    }

    #[test]
    fn no_blocks_yields_empty() {
        assert!(extract("").is_empty());
        assert!(extract("Please run the usual report.\nThanks").is_empty());
        // Header without the newline after "Query:" is not a block.
        assert!(extract("Database: orders Query: SELECT 1;").is_empty());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let body = "DATABASE: Orders\nquery:\nselect id from t;";
        assert_eq!(pairs(&extract(body)), vec![("Orders", "select id from t;")]);
    }

    #[test]
    fn multiline_query_is_kept_whole() {
        let body = "Database: reports\nQuery:\nSELECT id,\n       name\nFROM users\nWHERE active = 1;\n";
        let directives = extract(body);
        assert_eq!(directives.len(), 1);
        assert_eq!(
            directives[0].query,
            "SELECT id,\n       name\nFROM users\nWHERE active = 1;"
        );
    }

    #[test]
    fn blank_lines_after_query_header_are_skipped() {
        let body = "Database: orders\nQuery:\n\n\n  SELECT 1;  \n";
        assert_eq!(pairs(&extract(body)), vec![("orders", "SELECT 1;")]);
    }

    #[test]
    fn empty_query_is_dropped_but_siblings_survive() {
        let body = "Database: empty\nQuery:\nThanks\nDatabase: real\nQuery:\nSELECT 1;";
        assert_eq!(pairs(&extract(body)), vec![("real", "SELECT 1;")]);
    }

    #[test]
    fn signature_dash_line_is_trimmed() {
        let body = "Database: orders\nQuery:\nDELETE FROM carts WHERE stale = 1;\n\n-- \nAlice\nOps team";
        assert_eq!(
            pairs(&extract(body)),
            vec![("orders", "DELETE FROM carts WHERE stale = 1;")]
        );
    }

    #[test]
    fn strip_footer_without_marker_only_trims() {
        assert_eq!(strip_footer("  SELECT 1;  "), "SELECT 1;");
    }

    #[test]
    fn strip_footer_keeps_text_before_first_marker() {
        let query = "SELECT 1;\nRegards\nBob\nThanks again";
        let stripped = strip_footer(query);
        assert_eq!(stripped, "SELECT 1;");
        assert!(query.starts_with(stripped));
    }

    #[test]
    fn strip_footer_applies_markers_in_order() {
        // "--" comes first in the text but "Thanks" is checked first; the
        // sequential cuts still end before the earliest marker.
        assert_eq!(strip_footer("SELECT 1; -- note\nThanks"), "SELECT 1;");
    }

    #[test]
    fn strip_footer_never_lengthens() {
        for q in ["", "Thanks", "a--b", "RegardsThanks--", "plain"] {
            assert!(strip_footer(q).len() <= q.len());
        }
    }
}
