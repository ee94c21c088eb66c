//! Shared types for the query pipeline.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;

// ── Inbound message ─────────────────────────────────────────────────

/// A fetched email, decoded into the fields the pipeline needs.
///
/// Built by the mail transport. Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Decoded subject line.
    pub subject: String,
    /// Sender address (first From address).
    pub sender: String,
    /// Lower-cased union of From/To/Cc addresses.
    pub recipients: BTreeSet<String>,
    /// Message-ID, used to thread the reply.
    pub thread_id: Option<String>,
    /// Concatenated plain-text body.
    pub body: String,
    /// Date header, when present and parseable.
    pub received_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(
        subject: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let sender = sender.into();
        let mut recipients = BTreeSet::new();
        recipients.insert(sender.to_lowercase());
        Self {
            subject: subject.into(),
            sender,
            recipients,
            thread_id: None,
            body: body.into(),
            received_at: None,
        }
    }

    /// Add recipient addresses. Stored lower-cased; duplicates collapse.
    pub fn with_recipients<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients.extend(
            addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty()),
        );
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

// ── Directives and results ──────────────────────────────────────────

/// One (database, query) pair extracted from a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub database: String,
    pub query: String,
}

impl Directive {
    /// Build a directive, or `None` if either field is empty after trimming.
    pub fn new(database: &str, query: &str) -> Option<Self> {
        let database = database.trim();
        let query = query.trim();
        if database.is_empty() || query.is_empty() {
            return None;
        }
        Some(Self {
            database: database.to_string(),
            query: query.to_string(),
        })
    }
}

/// How a directive's dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    BackendFailure,
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BackendFailure => "backend_failure",
        }
    }
}

/// The result of running one directive.
#[derive(Debug, Clone)]
pub struct DirectiveResult {
    pub directive: Directive,
    /// Output as returned by the executor (empty if it never ran).
    pub raw_output: String,
    /// Human-readable text placed in the reply.
    pub formatted: String,
    pub outcome: Outcome,
}

impl DirectiveResult {
    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::BackendFailure
    }
}

// ── Outbound message ────────────────────────────────────────────────

/// The single aggregated reply for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    /// Empty for direct mail.
    pub cc: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body: String,
}

// ── Mail transport trait ────────────────────────────────────────────

/// Mail transport: pure I/O, no business logic.
///
/// Filtering, extraction and composition live in `MessagePipeline`.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name (e.g. "email").
    fn name(&self) -> &str;

    /// Fetch unread messages whose subject contains `subject_filter`.
    ///
    /// Bounded to the most recent N matches, oldest first.
    async fn fetch_unread(
        &self,
        subject_filter: &str,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// Send a composed reply.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_rejects_empty_fields() {
        assert!(Directive::new("", "SELECT 1").is_none());
        assert!(Directive::new("orders", "   \n ").is_none());
        assert!(Directive::new("  ", "  ").is_none());
    }

    #[test]
    fn directive_trims_fields() {
        let d = Directive::new(" orders ", "\n SELECT 1; \n").unwrap();
        assert_eq!(d.database, "orders");
        assert_eq!(d.query, "SELECT 1;");
    }

    #[test]
    fn inbound_recipients_are_lowercased_and_deduplicated() {
        let msg = InboundMessage::new("subj", "Alice@Example.com", "body").with_recipients([
            "alice@example.com",
            "BOB@example.com",
            "bob@Example.com",
            " ",
        ]);
        let recipients: Vec<&str> = msg.recipients.iter().map(String::as_str).collect();
        assert_eq!(recipients, vec!["alice@example.com", "bob@example.com"]);
        // The sender keeps its original casing.
        assert_eq!(msg.sender, "Alice@Example.com");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Success.label(), "success");
        assert_eq!(Outcome::BackendFailure.label(), "backend_failure");
    }
}
