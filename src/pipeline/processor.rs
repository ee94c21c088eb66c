//! Message pipeline — one inbound message in, at most one reply out.
//!
//! Per message:
//! 1. Filter on the exact trigger subject
//! 2. Extract directives from the body
//! 3. Dispatch each directive to the executor, in order
//! 4. Compose one aggregated reply and send it
//!
//! Messages and directives are handled strictly sequentially.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::backend::QueryExecutor;
use crate::error::{Error, TransportError};
use crate::pipeline::composer::ReplyComposer;
use crate::pipeline::extractor;
use crate::pipeline::interpreter::{LogPatternInterpreter, ResultInterpreter};
use crate::pipeline::types::{Directive, DirectiveResult, InboundMessage, MailTransport, Outcome};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Subject did not match the trigger phrase.
    Skipped,
    /// Subject matched but the body held no usable directive.
    NoDirectives,
    /// A reply was sent.
    Replied { directives: usize, failures: usize },
}

impl MessageOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::NoDirectives => "no_directives",
            Self::Replied { .. } => "replied",
        }
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub replied: usize,
    pub skipped: usize,
    pub no_directives: usize,
    pub send_failures: usize,
    /// Messages whose handling panicked. Their replies are lost.
    pub panics: usize,
}

/// Orchestrates extraction, execution, interpretation and reply.
pub struct MessagePipeline {
    transport: Arc<dyn MailTransport>,
    executor: Arc<dyn QueryExecutor>,
    interpreter: Arc<dyn ResultInterpreter>,
    composer: ReplyComposer,
    trigger_subject: String,
}

impl MessagePipeline {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        executor: Arc<dyn QueryExecutor>,
        trigger_subject: impl Into<String>,
        self_address: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            executor,
            interpreter: Arc::new(LogPatternInterpreter),
            composer: ReplyComposer::new(self_address),
            trigger_subject: trigger_subject.into(),
        }
    }

    /// Replace the output interpreter.
    pub fn with_interpreter(mut self, interpreter: Arc<dyn ResultInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn trigger_subject(&self) -> &str {
        &self.trigger_subject
    }

    /// Exact subject match. No trimming, no case folding.
    pub fn admits(&self, message: &InboundMessage) -> bool {
        message.subject == self.trigger_subject
    }

    /// Run one directive. Backend failures become a failed result.
    pub async fn dispatch(&self, directive: Directive) -> DirectiveResult {
        info!(database = %directive.database, "Running query");
        debug!(query = %directive.query, "Query text");

        let result = match self
            .executor
            .execute(&directive.database, &directive.query)
            .await
        {
            Ok(raw_output) => {
                let formatted = self.interpreter.interpret(&directive.query, &raw_output);
                DirectiveResult {
                    directive,
                    raw_output,
                    formatted,
                    outcome: Outcome::Success,
                }
            }
            Err(e) => {
                warn!(
                    database = %directive.database,
                    executor = self.executor.name(),
                    error = %e,
                    "Backend invocation failed"
                );
                DirectiveResult {
                    raw_output: e.output().to_string(),
                    formatted: format!("Backend invocation failed: {e}"),
                    directive,
                    outcome: Outcome::BackendFailure,
                }
            }
        };

        debug!(
            database = %result.directive.database,
            outcome = result.outcome.label(),
            output_len = result.raw_output.len(),
            "Query finished"
        );
        result
    }

    /// Run every directive in order, one at a time.
    pub async fn dispatch_all(&self, directives: Vec<Directive>) -> Vec<DirectiveResult> {
        let mut results = Vec::with_capacity(directives.len());
        for directive in directives {
            results.push(self.dispatch(directive).await);
        }
        results
    }

    /// Process one inbound message end to end.
    ///
    /// Only a failure to send the reply is returned as an error.
    pub async fn process(
        &self,
        message: &InboundMessage,
    ) -> Result<MessageOutcome, TransportError> {
        if !self.admits(message) {
            debug!(
                subject = %message.subject,
                sender = %message.sender,
                "Subject does not match trigger"
            );
            return Ok(MessageOutcome::Skipped);
        }

        info!(
            sender = %message.sender,
            subject = %message.subject,
            received_at = ?message.received_at,
            "Processing query email"
        );

        let directives = extractor::extract(&message.body);
        if directives.is_empty() {
            info!(sender = %message.sender, "No directives found, not replying");
            return Ok(MessageOutcome::NoDirectives);
        }

        let results = self.dispatch_all(directives).await;
        let failures = results.iter().filter(|r| r.is_failure()).count();

        let reply = self.composer.compose(message, &results);
        self.transport.send(&reply).await?;

        Ok(MessageOutcome::Replied {
            directives: results.len(),
            failures,
        })
    }

    /// One poll cycle: fetch, then process each message in order.
    ///
    /// A fetch failure aborts the cycle. A send failure or a panic while
    /// handling one message is logged and the remaining messages are still
    /// processed.
    pub async fn run_cycle(&self) -> Result<CycleReport, TransportError> {
        let messages = self.transport.fetch_unread(&self.trigger_subject).await?;
        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };

        for message in &messages {
            let handled = AssertUnwindSafe(self.process(message)).catch_unwind().await;
            match handled {
                Ok(Ok(MessageOutcome::Skipped)) => report.skipped += 1,
                Ok(Ok(MessageOutcome::NoDirectives)) => report.no_directives += 1,
                Ok(Ok(outcome @ MessageOutcome::Replied { directives, failures })) => {
                    report.replied += 1;
                    info!(
                        sender = %message.sender,
                        outcome = outcome.label(),
                        directives,
                        failures,
                        "Message handled"
                    );
                }
                Ok(Err(e)) => {
                    report.send_failures += 1;
                    error!(
                        sender = %message.sender,
                        transport = self.transport.name(),
                        error = %e,
                        "Failed to send reply"
                    );
                }
                Err(panic) => {
                    report.panics += 1;
                    let e = Error::from_panic(&*panic);
                    error!(
                        sender = %message.sender,
                        kind = e.kind(),
                        error = %e,
                        "Message handling panicked"
                    );
                }
            }
        }

        Ok(report)
    }
}
