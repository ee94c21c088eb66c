//! Backend output interpretation.
//!
//! Turns the executor's raw text into the result shown in the reply. The
//! classification is keyword sniffing on the query, never validation.

use std::sync::LazyLock;

use regex::Regex;

/// Reply text for a read query without any rows.
pub const NO_ROWS: &str = "Query executed. No rows returned.";

/// Reply text for a write query without an affected-row count.
pub const NO_ROWS_AFFECTED: &str = "Query executed. No rows returned or affected.";

/// Prefixes that mark a query as read-style.
const READ_KEYWORDS: [&str; 4] = ["select", "show", "describe", "explain"];

/// A `- {...}` record on a single line.
static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"- \{.*?\}").unwrap());

static ROWS_AFFECTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) row\(s\) affected").unwrap());

/// Read queries return rows, write queries report an affected count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Write,
}

/// Classify a query by its leading text.
///
/// Case-insensitive prefix match on the trimmed query, so `SELECTid` still
/// counts as a read.
pub fn classify(query: &str) -> QueryKind {
    let lowered = query.trim_start().to_ascii_lowercase();
    if READ_KEYWORDS.iter().any(|k| lowered.starts_with(k)) {
        QueryKind::Read
    } else {
        QueryKind::Write
    }
}

/// Converts raw backend output into reply text.
///
/// Kept behind a trait so a structured backend response can replace the
/// text patterns without touching the rest of the pipeline.
pub trait ResultInterpreter: Send + Sync {
    fn interpret(&self, query: &str, raw_output: &str) -> String;
}

/// Interpreter for the playbook's human-readable log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPatternInterpreter;

impl ResultInterpreter for LogPatternInterpreter {
    fn interpret(&self, query: &str, raw_output: &str) -> String {
        match classify(query) {
            QueryKind::Read => format_rows(raw_output),
            QueryKind::Write => format_affected(raw_output),
        }
    }
}

fn format_rows(raw_output: &str) -> String {
    let rows: Vec<&str> = ROW.find_iter(raw_output).map(|m| m.as_str()).collect();
    if rows.is_empty() {
        NO_ROWS.to_string()
    } else {
        rows.join("\n")
    }
}

fn format_affected(raw_output: &str) -> String {
    ROWS_AFFECTED
        .captures(raw_output)
        .and_then(|caps| caps.get(1))
        .map(|n| format!("{} row(s) affected.", n.as_str()))
        .unwrap_or_else(|| NO_ROWS_AFFECTED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(query: &str, raw: &str) -> String {
        LogPatternInterpreter.interpret(query, raw)
    }

    #[test]
    fn select_in_any_case_is_read() {
        assert_eq!(classify("SELECT 1"), QueryKind::Read);
        assert_eq!(classify("  select * from t"), QueryKind::Read);
        assert_eq!(classify("\nSeLeCt\n*\nfrom t"), QueryKind::Read);
        assert_eq!(classify("show tables"), QueryKind::Read);
    }

    #[test]
    fn read_keyword_is_a_prefix_match() {
        assert_eq!(classify("SELECTid FROM t"), QueryKind::Read);
        assert_eq!(classify("selection_update()"), QueryKind::Read);
        assert_eq!(classify("  Explain_plan"), QueryKind::Read);
        assert_eq!(classify("reselect 1"), QueryKind::Write);
    }

    #[test]
    fn other_statements_are_write() {
        assert_eq!(classify("UPDATE t SET x = 1"), QueryKind::Write);
        assert_eq!(classify("DELETE FROM t"), QueryKind::Write);
        assert_eq!(classify("INSERT INTO t VALUES (1)"), QueryKind::Write);
        assert_eq!(classify(""), QueryKind::Write);
    }

    #[test]
    fn read_rows_are_joined() {
        assert_eq!(
            interpret("SELECT * FROM t;", "- {id: 1}\n- {id: 2}"),
            "- {id: 1}\n- {id: 2}"
        );
    }

    #[test]
    fn read_rows_are_picked_out_of_noise() {
        let raw = "ok: [db1] => rows:\n  - {id: 7, name: x}\nPLAY RECAP\n  - {id: 8}";
        assert_eq!(interpret("select id from t", raw), "- {id: 7, name: x}\n- {id: 8}");
    }

    #[test]
    fn read_without_rows() {
        assert_eq!(interpret("SELECT 1 WHERE false", "ok: [db1]"), NO_ROWS);
        assert_eq!(interpret("SELECT 1", ""), NO_ROWS);
    }

    #[test]
    fn read_ignores_affected_counts() {
        assert_eq!(interpret("SELECT 1", "3 row(s) affected"), NO_ROWS);
    }

    #[test]
    fn write_reports_affected_count() {
        assert_eq!(
            interpret("UPDATE t SET x=1;", "changed: [db1]\n3 row(s) affected\n"),
            "3 row(s) affected."
        );
    }

    #[test]
    fn write_without_count() {
        assert_eq!(interpret("CREATE TABLE t (id int)", "ok"), NO_ROWS_AFFECTED);
    }

    #[test]
    fn write_ignores_rows() {
        assert_eq!(interpret("UPDATE t SET x=1", "- {id: 1}"), NO_ROWS_AFFECTED);
    }
}
