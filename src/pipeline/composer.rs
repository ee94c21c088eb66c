//! Reply composition: one aggregated reply per inbound message.

use std::fmt::Write as _;

use crate::pipeline::types::{DirectiveResult, InboundMessage, OutboundMessage};

/// Opening line of every reply body.
pub const PREAMBLE: &str = "Your queries have been executed.";

const SEPARATOR_WIDTH: usize = 40;

/// Builds replies on behalf of the agent's own address.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    self_address: String,
}

impl ReplyComposer {
    pub fn new(self_address: impl Into<String>) -> Self {
        Self {
            self_address: self_address.into(),
        }
    }

    /// Compose the reply for `original` from its directive results.
    pub fn compose(
        &self,
        original: &InboundMessage,
        results: &[DirectiveResult],
    ) -> OutboundMessage {
        OutboundMessage {
            from: self.self_address.clone(),
            to: original.sender.clone(),
            cc: self.cc_list(original),
            subject: format!("Re: {}", original.subject),
            in_reply_to: original.thread_id.clone(),
            references: original.thread_id.clone(),
            body: render_body(results),
        }
    }

    /// Everyone on the original message except the sender and ourselves.
    pub fn cc_list(&self, original: &InboundMessage) -> Vec<String> {
        let sender = original.sender.to_lowercase();
        let own = self.self_address.to_lowercase();
        original
            .recipients
            .iter()
            .map(|addr| addr.to_lowercase())
            .filter(|addr| *addr != sender && *addr != own)
            .collect()
    }
}

/// Render the reply body. Results appear in the order given.
pub fn render_body(results: &[DirectiveResult]) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let mut body = format!("{PREAMBLE}\n\n");
    for result in results {
        let _ = write!(
            body,
            "Database: {}\nQuery:\n{}\n\nResult:\n{}\n\n{separator}\n\n",
            result.directive.database, result.directive.query, result.formatted
        );
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Directive, Outcome};

    fn result(db: &str, query: &str, formatted: &str, outcome: Outcome) -> DirectiveResult {
        DirectiveResult {
            directive: Directive::new(db, query).unwrap(),
            raw_output: String::new(),
            formatted: formatted.into(),
            outcome,
        }
    }

    fn inbound() -> InboundMessage {
        InboundMessage::new("Execute the query Luffy", "Alice@Example.com", "...")
            .with_recipients([
                "alice@example.com",
                "ALICE@example.com",
                "agent@example.com",
                "Agent@Example.COM",
                "carol@example.com",
                "bob@example.com",
            ])
            .with_thread_id("<abc123@example.com>")
    }

    #[test]
    fn cc_excludes_sender_and_self_in_any_case() {
        let composer = ReplyComposer::new("AGENT@example.com");
        assert_eq!(
            composer.cc_list(&inbound()),
            vec!["bob@example.com", "carol@example.com"]
        );
    }

    #[test]
    fn cc_is_empty_for_direct_mail() {
        let composer = ReplyComposer::new("agent@example.com");
        let msg = InboundMessage::new("s", "alice@example.com", "b")
            .with_recipients(["agent@example.com"]);
        assert!(composer.cc_list(&msg).is_empty());
    }

    #[test]
    fn reply_headers() {
        let composer = ReplyComposer::new("agent@example.com");
        let reply = composer.compose(&inbound(), &[]);
        assert_eq!(reply.from, "agent@example.com");
        assert_eq!(reply.to, "Alice@Example.com");
        assert_eq!(reply.subject, "Re: Execute the query Luffy");
        assert_eq!(reply.in_reply_to.as_deref(), Some("<abc123@example.com>"));
        assert_eq!(reply.references.as_deref(), Some("<abc123@example.com>"));
    }

    #[test]
    fn reply_without_thread_id_has_no_threading() {
        let composer = ReplyComposer::new("agent@example.com");
        let msg = InboundMessage::new("s", "alice@example.com", "b");
        let reply = composer.compose(&msg, &[]);
        assert!(reply.in_reply_to.is_none());
        assert!(reply.references.is_none());
    }

    #[test]
    fn body_layout() {
        let results = [
            result("orders", "SELECT * FROM t;", "- {id: 1}", Outcome::Success),
            result(
                "billing",
                "UPDATE t SET x=1;",
                "Backend invocation failed: boom",
                Outcome::BackendFailure,
            ),
        ];
        let sep = "=".repeat(40);
        let expected = format!(
            "Your queries have been executed.\n\n\
             Database: orders\nQuery:\nSELECT * FROM t;\n\nResult:\n- {{id: 1}}\n\n{sep}\n\n\
             Database: billing\nQuery:\nUPDATE t SET x=1;\n\nResult:\nBackend invocation failed: boom\n\n{sep}\n\n"
        );
        assert_eq!(render_body(&results), expected);
    }

    #[test]
    fn body_preserves_result_order() {
        let results: Vec<_> = ["c", "a", "b"]
            .iter()
            .map(|db| result(db, "SELECT 1", "ok", Outcome::Success))
            .collect();
        let body = render_body(&results);
        let c = body.find("Database: c").unwrap();
        let a = body.find("Database: a").unwrap();
        let b = body.find("Database: b").unwrap();
        assert!(c < a && a < b);
    }
}
