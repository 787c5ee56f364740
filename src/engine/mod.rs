mod completion;
mod direct;
pub mod poller;
pub mod service;
pub mod state;
pub mod strategy;
mod submit;
#[cfg(test)]
pub(crate) mod testing;

use crate::model::{
    ExportEvent, ExportOutcome, ExportRecord, ExportRequest, ExportStrategy, ExportTuning,
    PollSummary,
};
use rand::RngCore;
use service::ExportService;
use state::StateWriter;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// Everything one export attempt needs. Built fresh for every attempt.
pub struct AttemptContext {
    pub service: Arc<dyn ExportService>,
    pub tuning: ExportTuning,
    pub state: StateWriter,
    pub cancel: CancellationToken,
}

impl AttemptContext {
    /// Race a service call against cancellation. `None` means the attempt was
    /// cancelled first and the call's result, if any ever arrives, is dropped.
    pub(crate) async fn call<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// Generate a random id for one attempt.
fn gen_request_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

fn now_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

pub struct ExportEngine {
    ctx: AttemptContext,
    base_url: String,
}

impl ExportEngine {
    pub fn new(ctx: AttemptContext, base_url: impl Into<String>) -> Self {
        Self {
            ctx,
            base_url: base_url.into(),
        }
    }

    /// Run one attempt to its terminal outcome. Never fails: every error is
    /// turned into a state reset, a notice and the returned record's outcome.
    pub async fn run(self, request: ExportRequest) -> ExportRecord {
        let request_id = gen_request_id();
        let span = info_span!("export", request_id = %request_id);
        self.run_inner(request, request_id).instrument(span).await
    }

    async fn run_inner(self, request: ExportRequest, request_id: String) -> ExportRecord {
        let ctx = &self.ctx;
        let started = Instant::now();
        let timestamp_utc = now_utc();
        let ExportRequest {
            filters,
            total_records,
        } = request;

        let strategy = strategy::select_strategy(total_records, ctx.tuning.sync_threshold);
        info!(?strategy, total_records, "export started");
        ctx.state.emit(ExportEvent::Started {
            strategy,
            total_records,
        });

        let (outcome, job_id, poll): (ExportOutcome, _, Option<PollSummary>) = match strategy {
            ExportStrategy::Direct => (direct::run_direct(ctx, &filters).await, None, None),
            ExportStrategy::Job => match submit::submit_job(ctx, &filters).await {
                Err(outcome) => (outcome, None, None),
                Ok(job_id) => {
                    let mut poller = poller::JobPoller::new(ctx, job_id.clone());
                    let polled = poller.run().await;
                    debug_assert!(poller.state().is_terminal());
                    let summary = poller.summary();
                    let outcome = match polled {
                        poller::PollOutcome::Completed { filename } => {
                            completion::handle_completed(ctx, &job_id, filename).await
                        }
                        poller::PollOutcome::JobFailed { message } => {
                            ExportOutcome::JobFailed { message }
                        }
                        poller::PollOutcome::Exhausted { failures } => {
                            ExportOutcome::PollExhausted { failures }
                        }
                        poller::PollOutcome::Cancelled => ExportOutcome::Cancelled,
                    };
                    (outcome, Some(job_id), Some(summary))
                }
            },
        };

        let record = ExportRecord {
            timestamp_utc,
            request_id,
            base_url: self.base_url.clone(),
            filters,
            total_records,
            strategy,
            job_id,
            outcome,
            poll,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(outcome = record.outcome.label(), duration_ms = record.duration_ms, "export finished");

        // A cancelled attempt is wrapped up by whoever cancelled it.
        if record.outcome != ExportOutcome::Cancelled {
            ctx.state.emit(ExportEvent::Finished {
                record: Box::new(record.clone()),
            });
        }
        record
    }
}

/// Record for a request that never ran because another attempt was active.
pub fn rejected_record(
    base_url: &str,
    request: ExportRequest,
    tuning: &ExportTuning,
) -> ExportRecord {
    ExportRecord {
        timestamp_utc: now_utc(),
        request_id: gen_request_id(),
        base_url: base_url.to_string(),
        strategy: strategy::select_strategy(request.total_records, tuning.sync_threshold),
        filters: request.filters,
        total_records: request.total_records,
        job_id: None,
        outcome: ExportOutcome::Rejected,
        poll: None,
        duration_ms: 0,
    }
}
