//! Email-specific helpers — MIME decoding into `InboundMessage`, address extraction.

use std::collections::BTreeSet;

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::pipeline::types::InboundMessage;

/// Parse a raw RFC 822 message into an `InboundMessage`.
///
/// Returns `None` if the bytes are not a message or there is no sender to
/// reply to.
pub fn parse_inbound(raw: &[u8]) -> Option<InboundMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = extract_addresses(parsed.from());
    let sender = from.first()?.clone();

    let recipients: BTreeSet<String> = from
        .iter()
        .chain(extract_addresses(parsed.to()).iter())
        .chain(extract_addresses(parsed.cc()).iter())
        .map(|a| a.to_lowercase())
        .collect();

    let received_at = parsed
        .date()
        .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0));

    Some(InboundMessage {
        subject: parsed.subject().unwrap_or_default().to_string(),
        sender,
        recipients,
        thread_id: parsed.message_id().map(|id| format!("<{id}>")),
        body: plain_text_body(&parsed),
        received_at,
    })
}

/// Concatenate every `text/plain` part that is not an attachment.
pub fn plain_text_body(parsed: &mail_parser::Message) -> String {
    let mut body = String::new();
    for part in &parsed.parts {
        let PartType::Text(text) = &part.body else {
            continue;
        };
        let is_attachment = MimeHeaders::content_disposition(part)
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));
        if !is_attachment {
            body.push_str(text);
        }
    }
    body
}

/// Extract email addresses from an optional mail_parser Address field.
///
/// Returns an empty vec if the address is None.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.trim().to_string()))
            })
            .filter(|s| !s.is_empty())
            .collect(),
    }
}
