//! Email transport — IMAP over TLS for inbound, SMTP via lettre for outbound.
//!
//! Both directions use blocking sockets and run on `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::email_types::parse_inbound;
use crate::config::EmailConfig;
use crate::error::TransportError;
use crate::pipeline::types::{InboundMessage, MailTransport, OutboundMessage};

/// Socket read timeout for IMAP.
const IMAP_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Transport ───────────────────────────────────────────────────────

/// Email transport — IMAP polling (inbound) + SMTP (outbound).
#[derive(Debug, Clone)]
pub struct EmailTransport {
    config: EmailConfig,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }
}

#[async_trait]
impl MailTransport for EmailTransport {
    fn name(&self) -> &str {
        "email"
    }

    async fn fetch_unread(
        &self,
        subject_filter: &str,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let config = self.config.clone();
        let filter = subject_filter.to_string();
        tokio::task::spawn_blocking(move || fetch_unseen_imap(&config, &filter))
            .await
            .map_err(|e| TransportError::TaskFailed(e.to_string()))?
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let email = build_message(message)?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || send_smtp(&config, &email))
            .await
            .map_err(|e| TransportError::TaskFailed(e.to_string()))??;

        info!(
            to = %message.to,
            cc = %message.cc.join(", "),
            "Reply sent"
        );
        Ok(())
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build the lettre message for an outbound reply.
pub fn build_message(message: &OutboundMessage) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&message.from)?)
        .to(parse_mailbox(&message.to)?)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN);

    for cc in &message.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    if let Some(id) = &message.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(id) = &message.references {
        builder = builder.references(id.clone());
    }

    builder
        .body(message.body.clone())
        .map_err(|e| TransportError::SendFailed {
            reason: format!("Failed to build email: {e}"),
        })
}

/// Send via SMTP. Port 465 uses implicit TLS, anything else STARTTLS.
fn send_smtp(config: &EmailConfig, email: &Message) -> Result<(), TransportError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let relay = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    };

    let transport = relay
        .map_err(|e| TransportError::ConnectFailed {
            host: config.smtp_host.clone(),
            reason: e.to_string(),
        })?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport.send(email).map_err(|e| TransportError::SendFailed {
        reason: format!("SMTP send failed: {e}"),
    })?;
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Tagged response to one IMAP command.
#[derive(Debug, Default)]
struct ImapResponse {
    /// Untagged lines, CRLF stripped.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks) in order of appearance.
    literals: Vec<Vec<u8>>,
}

/// Minimal blocking IMAP client session.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, TransportError> {
        let connect_err = |reason: String| TransportError::ConnectFailed {
            host: config.imap_host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(IMAP_READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.imap_host.clone())
            .map_err(|e| connect_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(TransportError::Protocol(format!(
                "Unexpected IMAP greeting: {greeting}"
            )));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(TransportError::Protocol("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send one command and read up to its tagged completion.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, TransportError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = ImapResponse::default();
        let tag_prefix = format!("{tag} ");
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&tag_prefix) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(TransportError::Protocol(format!(
                    "IMAP command failed: {status}"
                )));
            }
            if let Some(len) = literal_length(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        self.command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .map(|_| ())
            .map_err(|e| TransportError::AuthFailed {
                reason: e.to_string(),
            })
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

/// Length of a `{n}` literal announced at the end of a response line.
fn literal_length(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// UIDs from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Keep only the most recent `window` UIDs.
fn recent_window(mut uids: Vec<u32>, window: usize) -> Vec<u32> {
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(window);
    uids.split_off(skip)
}

/// Fetch unseen messages whose subject contains `subject_filter` (blocking).
///
/// Fetching the full RFC822 body marks each message \Seen.
fn fetch_unseen_imap(
    config: &EmailConfig,
    subject_filter: &str,
) -> Result<Vec<InboundMessage>, TransportError> {
    let mut session = ImapSession::connect(config)?;
    session.login(&config.username, config.password.expose_secret())?;
    session.command(&format!("SELECT {}", quote(&config.mailbox)))?;

    let search = session.command(&format!(
        "UID SEARCH UNSEEN SUBJECT {}",
        quote(subject_filter)
    ))?;
    let found = parse_search(&search.lines);
    let uids = recent_window(found.clone(), config.fetch_window);
    info!(
        found = found.len(),
        fetching = uids.len(),
        mailbox = %config.mailbox,
        "Unread matching emails"
    );

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetched = session.command(&format!("UID FETCH {uid} (RFC822)"))?;
        let Some(raw) = fetched.literals.first() else {
            warn!(uid, "IMAP fetch returned no message body");
            continue;
        };
        match parse_inbound(raw) {
            Some(msg) => messages.push(msg),
            None => warn!(uid, "Skipping unparseable email"),
        }
    }

    session.logout();
    Ok(messages)
}
