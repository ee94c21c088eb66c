//! Execution backend: runs one query against a named database.

pub mod playbook;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::BackendError;

pub use playbook::PlaybookExecutor;

/// Runs a query and returns the backend's textual output.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executor name for logs.
    fn name(&self) -> &str;

    /// Execute `query` against `database`, returning the raw output.
    async fn execute(&self, database: &str, query: &str) -> Result<String, BackendError>;
}

/// A `"msg": "..."` field in the backend's log stream.
static MSG_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"msg":\s*"((?:\\.|[^"\\])*)""#).unwrap());

/// One backslash escape inside the `msg` field.
static ESCAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\\(.)").unwrap());

/// Escapes JSON understands. Anything else is kept as the bare character.
const JSON_ESCAPES: &str = "\"\\/bfnrtu";

/// Pull the embedded `msg` field out of a structured log stream.
///
/// The field is unescaped as a JSON string, with unknown escapes such as
/// `\'` reduced to the escaped character. Falls back to the whole output
/// when no field is present or the text still cannot be decoded.
pub fn extract_message(output: &str) -> String {
    MSG_FIELD
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| unescape(m.as_str()))
        .unwrap_or_else(|| output.to_string())
        .trim()
        .to_string()
}

fn unescape(escaped: &str) -> Option<String> {
    let normalized = ESCAPE.replace_all(escaped, |caps: &regex::Captures<'_>| {
        let escaped_char = &caps[1];
        if JSON_ESCAPES.contains(escaped_char) {
            caps[0].to_string()
        } else {
            escaped_char.to_string()
        }
    });
    serde_json::from_str::<String>(&format!("\"{normalized}\"")).ok()
}
