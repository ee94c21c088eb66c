use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use query_mail_agent::backend::PlaybookExecutor;
use query_mail_agent::channels::EmailTransport;
use query_mail_agent::config::AgentConfig;
use query_mail_agent::pipeline::MessagePipeline;
use query_mail_agent::pipeline::poller::spawn_query_poller;

/// Stderr logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "query-mail-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AgentConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Query Mail Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{}", config.email.imap_host, config.email.imap_port);
    eprintln!("   SMTP: {}:{}", config.email.smtp_host, config.email.smtp_port);
    eprintln!("   Trigger: {:?}", config.trigger_subject);
    eprintln!(
        "   Backend: {} {}",
        config.backend.program,
        config.backend.base_args.join(" ")
    );
    eprintln!("   Poll: every {}s\n", config.schedule.interval.as_secs());

    let transport = Arc::new(EmailTransport::new(config.email.clone()));
    let executor = Arc::new(PlaybookExecutor::new(config.backend.clone()));
    let pipeline = Arc::new(MessagePipeline::new(
        transport,
        executor,
        config.trigger_subject.clone(),
        config.email.from_address.clone(),
    ));

    let (mut poller, shutdown) = spawn_query_poller(pipeline, config.schedule);

    let interrupted = tokio::select! {
        joined = &mut poller => {
            joined.context("Query poller task failed")?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            true
        }
    };

    if interrupted {
        info!("Interrupt received, stopping");
        shutdown.store(true, Ordering::Relaxed);
        poller.abort();
    }

    Ok(())
}
