//! Query message processing pipeline.
//!
//! Every inbound message flows through:
//! 1. `MessagePipeline::admits()` — exact trigger-subject filter
//! 2. `extractor::extract()` — (database, query) directives from the body
//! 3. `QueryExecutor::execute()` + `ResultInterpreter::interpret()` per directive
//! 4. `ReplyComposer::compose()` — one aggregated, threaded reply
//!
//! `poller` drives one pipeline cycle per tick.

pub mod composer;
pub mod extractor;
pub mod interpreter;
pub mod poller;
pub mod processor;
pub mod types;

pub use processor::{CycleReport, MessageOutcome, MessagePipeline};
pub use types::{
    Directive, DirectiveResult, InboundMessage, MailTransport, OutboundMessage, Outcome,
};
