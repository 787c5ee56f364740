//! Job progress polling.
//!
//! A [`JobPoller`] owns everything one polling run needs: the tick timer, the
//! [`FailureGovernor`] holding the consecutive failure count, and the round
//! trip samples. Both the timer and the counter die with the poller, so a new
//! attempt always starts from a clean slate.
//!
//! ```text
//! Submitted -> Polling -+-> Completed
//!                       +-> JobFailed
//!                       +-> PollExhausted
//!                       +-> Cancelled
//! ```

use super::AttemptContext;
use crate::error::ExportError;
use crate::model::{JobId, JobStatus, NoticeLevel, PollSummary};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub(crate) const POLL_EXHAUSTED_MESSAGE: &str = "Export progress query failed";
const JOB_FAILED_FALLBACK: &str = "Export failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Completed,
    JobFailed,
    PollExhausted,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollState::Submitted | PollState::Polling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed { filename: Option<String> },
    JobFailed { message: String },
    Exhausted { failures: u32 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Below the budget: keep polling.
    Retry { consecutive: u32 },
    /// Budget spent: stop.
    Exhausted { failures: u32 },
}

/// Retry budget for status queries that fail in transport. Job failures
/// reported by the server never pass through here.
#[derive(Debug, Clone)]
pub struct FailureGovernor {
    max_consecutive: u32,
    consecutive: u32,
    total: u32,
    worst: u32,
}

impl FailureGovernor {
    pub fn new(max_consecutive: u32) -> Self {
        Self {
            max_consecutive: max_consecutive.max(1),
            consecutive: 0,
            total: 0,
            worst: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn record_failure(&mut self) -> FailureVerdict {
        self.consecutive += 1;
        self.total += 1;
        self.worst = self.worst.max(self.consecutive);
        if self.consecutive >= self.max_consecutive {
            FailureVerdict::Exhausted {
                failures: self.consecutive,
            }
        } else {
            FailureVerdict::Retry {
                consecutive: self.consecutive,
            }
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn worst(&self) -> u32 {
        self.worst
    }
}

pub struct JobPoller<'a> {
    ctx: &'a AttemptContext,
    job_id: JobId,
    state: PollState,
    governor: FailureGovernor,
    polls: u32,
    rtt_ms: Vec<f64>,
}

impl<'a> JobPoller<'a> {
    pub(crate) fn new(ctx: &'a AttemptContext, job_id: JobId) -> Self {
        Self {
            ctx,
            job_id,
            state: PollState::Submitted,
            governor: FailureGovernor::new(ctx.tuning.max_poll_failures),
            polls: 0,
            rtt_ms: Vec::new(),
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.governor.consecutive()
    }

    pub fn summary(&self) -> PollSummary {
        crate::metrics::poll_summary(
            self.polls,
            self.governor.total(),
            self.governor.worst(),
            &self.rtt_ms,
        )
    }

    /// Poll until the job reaches a terminal state or the attempt is cancelled.
    /// The first query goes out one interval after submission. A tick never
    /// starts before the previous query has answered; an overdue tick fires
    /// as soon as it has.
    pub async fn run(&mut self) -> PollOutcome {
        let period = self.ctx.tuning.poll_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.state = PollState::Polling;

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => {
                    self.state = PollState::Cancelled;
                    return PollOutcome::Cancelled;
                }
                _ = timer.tick() => {}
            }
            if let Some(outcome) = self.tick().await {
                debug!(job_id = %self.job_id, state = ?self.state, "polling stopped");
                return outcome;
            }
        }
    }

    async fn tick(&mut self) -> Option<PollOutcome> {
        let ctx = self.ctx;
        self.polls += 1;
        let started = Instant::now();

        let Some(result) = ctx.call(ctx.service.query_job(&self.job_id)).await else {
            self.state = PollState::Cancelled;
            return Some(PollOutcome::Cancelled);
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(source) => return self.on_query_failure(source),
        };

        self.rtt_ms.push(started.elapsed().as_secs_f64() * 1000.0);
        self.governor.record_success();
        ctx.state.set_progress(snapshot.to_progress());
        debug!(job_id = %self.job_id, status = ?snapshot.status, progress = snapshot.percent(), "job status");

        match snapshot.status {
            JobStatus::Pending | JobStatus::Running => None,
            JobStatus::Completed => {
                self.state = PollState::Completed;
                ctx.state.finish();
                info!(job_id = %self.job_id, polls = self.polls, "export job completed");
                Some(PollOutcome::Completed {
                    filename: snapshot.filename,
                })
            }
            JobStatus::Failed => {
                self.state = PollState::JobFailed;
                ctx.state.finish();
                let message = if snapshot.message.trim().is_empty() {
                    JOB_FAILED_FALLBACK.to_string()
                } else {
                    snapshot.message
                };
                let err = ExportError::JobFailed {
                    message: message.clone(),
                };
                warn!(job_id = %self.job_id, "{err}");
                ctx.state.notify(NoticeLevel::Error, message.clone());
                Some(PollOutcome::JobFailed { message })
            }
        }
    }

    fn on_query_failure(&mut self, source: crate::error::ServiceError) -> Option<PollOutcome> {
        match self.governor.record_failure() {
            FailureVerdict::Retry { consecutive } => {
                let err = ExportError::PollTransient {
                    consecutive,
                    source,
                };
                warn!(job_id = %self.job_id, "{err}");
                None
            }
            FailureVerdict::Exhausted { failures } => {
                self.state = PollState::PollExhausted;
                self.ctx.state.finish();
                let err = ExportError::PollExhausted { failures };
                warn!(job_id = %self.job_id, last_error = %source, "{err}");
                self.ctx
                    .state
                    .notify(NoticeLevel::Error, POLL_EXHAUSTED_MESSAGE);
                Some(PollOutcome::Exhausted { failures })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{completed, context, poll_error, snapshot, ScriptedService};
    use crate::model::{ExportEvent, ExportSessionState};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_governor_resets_on_success() {
        let mut g = FailureGovernor::new(3);
        assert_eq!(g.record_failure(), FailureVerdict::Retry { consecutive: 1 });
        assert_eq!(g.record_failure(), FailureVerdict::Retry { consecutive: 2 });
        g.record_success();
        assert_eq!(g.consecutive(), 0);
        assert_eq!(g.record_failure(), FailureVerdict::Retry { consecutive: 1 });
        assert_eq!(g.record_failure(), FailureVerdict::Retry { consecutive: 2 });
        assert_eq!(g.record_failure(), FailureVerdict::Exhausted { failures: 3 });
        assert_eq!(g.total(), 5);
        assert_eq!(g.worst(), 3);
    }

    #[test]
    fn test_governor_budget_is_at_least_one() {
        let mut g = FailureGovernor::new(0);
        assert_eq!(g.record_failure(), FailureVerdict::Exhausted { failures: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_cadence() {
        let svc = Arc::new(ScriptedService::new(vec![
            snapshot(JobStatus::Pending, 0.0, "queued"),
            snapshot(JobStatus::Running, 30.0, "rows"),
            snapshot(JobStatus::Running, 60.0, "rows"),
            completed("f.xlsx"),
        ]));
        let (ctx, _harness) = context(svc.clone());
        let start = Instant::now();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;

        assert_eq!(
            outcome,
            PollOutcome::Completed {
                filename: Some("f.xlsx".into())
            }
        );
        let offsets: Vec<Duration> = svc.query_times().iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(6000),
                Duration::from_millis(8000),
            ]
        );
        assert_eq!(poller.state(), PollState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_delays_next_tick() {
        let svc = Arc::new(
            ScriptedService::new(vec![
                snapshot(JobStatus::Running, 10.0, "rows"),
                completed("f.xlsx"),
            ])
            .with_latency(Duration::from_millis(3000)),
        );
        let (ctx, _harness) = context(svc.clone());
        let start = Instant::now();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        poller.run().await;

        let offsets: Vec<Duration> = svc.query_times().iter().map(|t| *t - start).collect();
        // The first query answers at 5s, past the 4s tick: the overdue tick
        // fires as soon as the answer is in, never while a query is pending.
        assert_eq!(
            offsets,
            vec![Duration::from_millis(2000), Duration::from_millis(5000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_completion() {
        let svc = Arc::new(ScriptedService::new(vec![
            snapshot(JobStatus::Running, 45.0, "Building rows"),
            completed("f.xlsx"),
        ]));
        let (ctx, mut harness) = context(svc.clone());
        ctx.state.begin();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;

        assert!(matches!(outcome, PollOutcome::Completed { .. }));
        assert_eq!(*harness.state.borrow(), ExportSessionState::default());

        let progress: Vec<u8> = harness
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                ExportEvent::Progress(p) => Some(p.progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![45, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nine_failures_then_success_keeps_polling() {
        let mut script: Vec<_> = (0..9).map(|_| poll_error()).collect();
        script.push(snapshot(JobStatus::Running, 70.0, "rows"));
        script.push(poll_error());
        script.push(completed("f.xlsx"));
        let svc = Arc::new(ScriptedService::new(script));
        let (ctx, mut harness) = context(svc.clone());
        ctx.state.begin();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;

        assert!(matches!(outcome, PollOutcome::Completed { .. }));
        assert_eq!(svc.query_count(), 12);
        assert_eq!(poller.failure_count(), 0);
        let summary = poller.summary();
        assert_eq!(summary.polls, 12);
        assert_eq!(summary.failures, 10);
        assert_eq!(summary.max_consecutive_failures, 9);
        // Transient failures stay out of the notification stream.
        assert!(!harness
            .drain_events()
            .iter()
            .any(|e| matches!(e, ExportEvent::Notice { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_resets_on_success() {
        let mut script: Vec<_> = (0..9).map(|_| poll_error()).collect();
        script.push(snapshot(JobStatus::Running, 70.0, "rows"));
        let svc = Arc::new(ScriptedService::new(script));
        let (ctx, _harness) = context(svc.clone());

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        for _ in 0..9 {
            assert_eq!(poller.tick().await, None);
        }
        assert_eq!(poller.failure_count(), 9);
        assert_eq!(poller.tick().await, None);
        assert_eq!(poller.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_failures_exhaust_budget() {
        let svc = Arc::new(ScriptedService::new((0..20).map(|_| poll_error()).collect()));
        let (ctx, mut harness) = context(svc.clone());
        ctx.state.begin();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;
        assert_eq!(outcome, PollOutcome::Exhausted { failures: 10 });
        assert_eq!(poller.state(), PollState::PollExhausted);
        assert_eq!(svc.query_count(), 10);
        assert!(!harness.state.borrow().exporting);

        // The timer went away with the loop.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(svc.query_count(), 10);

        let notices: Vec<String> = harness
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                ExportEvent::Notice { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(notices, vec![POLL_EXHAUSTED_MESSAGE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_is_terminal_immediately() {
        let svc = Arc::new(ScriptedService::new(vec![
            poll_error(),
            snapshot(JobStatus::Failed, 20.0, "Template missing"),
        ]));
        let (ctx, mut harness) = context(svc.clone());
        ctx.state.begin();

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;

        assert_eq!(
            outcome,
            PollOutcome::JobFailed {
                message: "Template missing".into()
            }
        );
        assert_eq!(svc.query_count(), 2);
        assert_eq!(*harness.state.borrow(), ExportSessionState::default());
        assert!(harness.drain_events().iter().any(|e| matches!(
            e,
            ExportEvent::Notice { level: NoticeLevel::Error, message } if message == "Template missing"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_without_message_uses_fallback() {
        let svc = Arc::new(ScriptedService::new(vec![snapshot(JobStatus::Failed, 0.0, " ")]));
        let (ctx, _harness) = context(svc);
        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        assert_eq!(
            poller.run().await,
            PollOutcome::JobFailed {
                message: JOB_FAILED_FALLBACK.into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling_without_state_change() {
        let svc = Arc::new(ScriptedService::new(vec![]).with_latency(Duration::from_millis(500)));
        let (ctx, harness) = context(svc.clone());
        ctx.state.begin();
        let cancel = ctx.cancel.clone();

        let canceller = tokio::spawn(async move {
            // Lands while the second query is in flight.
            tokio::time::sleep(Duration::from_millis(4200)).await;
            cancel.cancel();
        });

        let mut poller = JobPoller::new(&ctx, JobId("job-1".into()));
        let outcome = poller.run().await;
        canceller.await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(poller.state(), PollState::Cancelled);
        assert_eq!(svc.query_count(), 2);
        let state = harness.state.borrow().clone();
        assert!(state.exporting);
        // Only the first answer (at 2.5s) made it in.
        assert_eq!(state.export_progress.map(|p| p.progress), Some(50));
    }
}
