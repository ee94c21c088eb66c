//! Supervised poll loop — runs one pipeline cycle per tick, forever.
//!
//! Errors are classified:
//! - `TransportError` from the fetch → bounded exponential backoff
//! - anything else (panics outside per-message handling) → logged, normal interval
//!
//! Nothing that happens inside a cycle stops the loop. Only the shutdown
//! flag does. Panics while handling a single message are already contained
//! by `MessagePipeline::run_cycle`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PollSchedule;
use crate::error::{Error, Result};
use crate::pipeline::processor::{CycleReport, MessagePipeline};

/// Delay policy for the poll loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: PollSchedule,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(schedule: PollSchedule) -> Self {
        Self {
            schedule,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next cycle given how this one ended.
    pub fn next_delay(&mut self, result: &Result<CycleReport>) -> Duration {
        match result {
            Err(Error::Transport(_)) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let factor = 2u32.saturating_pow(self.consecutive_failures.min(16));
                self.schedule
                    .interval
                    .saturating_mul(factor)
                    .min(self.schedule.max_backoff.max(self.schedule.interval))
            }
            _ => {
                self.consecutive_failures = 0;
                self.schedule.interval
            }
        }
    }
}

/// Run one cycle, converting panics into `Error::Unexpected`.
pub async fn supervised_cycle(pipeline: &MessagePipeline) -> Result<CycleReport> {
    match AssertUnwindSafe(pipeline.run_cycle()).catch_unwind().await {
        Ok(result) => result.map_err(Error::from),
        Err(panic) => Err(Error::from_panic(&*panic)),
    }
}

/// Spawn the poll loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_query_poller(
    pipeline: Arc<MessagePipeline>,
    schedule: PollSchedule,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = schedule.interval.as_secs(),
            trigger = %pipeline.trigger_subject(),
            "Query poller started"
        );

        let mut backoff = Backoff::new(schedule);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Query poller shutting down");
                return;
            }

            let cycle_id = Uuid::new_v4();
            let result = supervised_cycle(&pipeline)
                .instrument(info_span!("poll_cycle", %cycle_id))
                .await;

            match &result {
                Ok(report) if report.fetched > 0 => info!(
                    %cycle_id,
                    fetched = report.fetched,
                    replied = report.replied,
                    skipped = report.skipped,
                    no_directives = report.no_directives,
                    send_failures = report.send_failures,
                    panics = report.panics,
                    "Poll cycle complete"
                ),
                Ok(_) => {}
                Err(e @ Error::Transport(_)) => {
                    warn!(%cycle_id, error = %e, "Mail transport failed")
                }
                Err(e) => error!(%cycle_id, kind = e.kind(), error = %e, "Poll cycle failed"),
            }

            let delay = backoff.next_delay(&result);
            if backoff.consecutive_failures() > 0 {
                warn!(
                    failures = backoff.consecutive_failures(),
                    delay_secs = delay.as_secs(),
                    "Backing off after transport failure"
                );
            }
            tokio::time::sleep(delay).await;
        }
    });

    (handle, shutdown_flag)
}
