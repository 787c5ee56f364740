//! Export session: the state a UI binds to, and the guard that ties a running
//! attempt to the session's lifetime.

use crate::engine::service::ExportService;
use crate::engine::state::StateWriter;
use crate::engine::{rejected_record, AttemptContext, ExportEngine};
use crate::error::ExportError;
use crate::model::{
    ExportConfig, ExportEvent, ExportOutcome, ExportRecord, ExportRequest, ExportSessionState,
    NoticeLevel,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle of the attempt currently running in a session.
struct ActiveAttempt {
    cancel: CancellationToken,
    task: JoinHandle<ExportRecord>,
}

/// Single slot for the session's running attempt. Whatever is in the slot is
/// cancelled and aborted when the guard is released or dropped.
#[derive(Default)]
pub struct LifecycleGuard {
    slot: Option<ActiveAttempt>,
}

impl LifecycleGuard {
    fn arm(&mut self, attempt: ActiveAttempt) {
        self.release();
        self.slot = Some(attempt);
    }

    /// Whether an attempt is still running.
    pub fn is_running(&self) -> bool {
        self.slot.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Whether the slot holds an attempt, running or not yet collected.
    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    fn take(&mut self) -> Option<ActiveAttempt> {
        self.slot.take()
    }

    /// Cancel and abort the attempt in the slot, if any, and empty the slot.
    pub fn release(&mut self) {
        if let Some(attempt) = self.slot.take() {
            attempt.cancel.cancel();
            attempt.task.abort();
        }
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// One consumer's view of exports: at most one attempt at a time, observable
/// through [`ExportSession::state`] / [`ExportSession::subscribe`], with
/// notices delivered on the event channel given at construction.
///
/// Dropping the session (or calling [`ExportSession::teardown`]) cancels the
/// running attempt and detaches the state: nothing the attempt still does
/// afterwards becomes visible.
pub struct ExportSession {
    service: Arc<dyn ExportService>,
    config: ExportConfig,
    writer: StateWriter,
    state_rx: watch::Receiver<ExportSessionState>,
    guard: LifecycleGuard,
}

impl ExportSession {
    pub fn new(
        service: Arc<dyn ExportService>,
        config: ExportConfig,
        events: mpsc::UnboundedSender<ExportEvent>,
    ) -> Self {
        let (writer, state_rx) = StateWriter::new(events);
        Self {
            service,
            config,
            writer,
            state_rx,
            guard: LifecycleGuard::default(),
        }
    }

    pub fn state(&self) -> ExportSessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportSessionState> {
        self.state_rx.clone()
    }

    pub fn is_active(&self) -> bool {
        self.guard.is_running()
    }

    /// Whether there is an attempt [`ExportSession::wait`] would collect.
    pub fn has_attempt(&self) -> bool {
        self.guard.is_armed()
    }

    /// Spawn an attempt. Rejected with [`ExportError::Busy`] while another
    /// attempt is running; the running one is left alone.
    pub fn start(&mut self, request: ExportRequest) -> Result<(), ExportError> {
        if self.guard.is_running() {
            self.writer.notify(
                NoticeLevel::Error,
                "An export is already in progress",
            );
            return Err(ExportError::Busy);
        }
        // A finished attempt nobody collected is dropped here.
        self.guard.release();

        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            service: Arc::clone(&self.service),
            tuning: self.config.tuning(),
            state: self.writer.clone(),
            cancel: cancel.clone(),
        };
        let engine = ExportEngine::new(ctx, self.config.base_url.clone());
        let task = tokio::spawn(engine.run(request));
        self.guard.arm(ActiveAttempt { cancel, task });
        debug!("export attempt started");
        Ok(())
    }

    /// Wait for the armed attempt and collect its record. `None` when nothing
    /// is armed.
    pub async fn wait(&mut self) -> Option<ExportRecord> {
        let attempt = self.guard.slot.as_mut()?;
        let joined = (&mut attempt.task).await;
        self.guard.take();
        match joined {
            Ok(record) => Some(record),
            Err(e) => {
                error!("export task failed: {e}");
                self.writer.finish();
                self.writer
                    .notify(NoticeLevel::Error, format!("Export task failed: {e}"));
                None
            }
        }
    }

    /// Run one attempt to completion. Never fails: a rejected request comes
    /// back as a record with [`ExportOutcome::Rejected`].
    pub async fn run(&mut self, request: ExportRequest) -> ExportRecord {
        let tuning = self.config.tuning();
        let fallback = request.clone();
        if self.start(request).is_err() {
            return rejected_record(&self.config.base_url, fallback, &tuning);
        }
        match self.wait().await {
            Some(record) => record,
            // The task panicked; report it like a failed direct export.
            None => {
                let mut record = rejected_record(&self.config.base_url, fallback, &tuning);
                record.outcome = ExportOutcome::SyncFailed {
                    message: "export task failed".into(),
                };
                record
            }
        }
    }

    /// Cancel the running attempt on the user's behalf, wait for it to stop,
    /// then reset state once and say so.
    pub async fn cancel(&mut self) -> Option<ExportRecord> {
        let attempt = self.guard.slot.as_ref()?;
        attempt.cancel.cancel();
        let record = self.wait().await?;
        self.writer.finish();
        if record.outcome == ExportOutcome::Cancelled {
            info!("export cancelled");
            self.writer.notify(NoticeLevel::Info, "Export cancelled");
            self.writer.emit(ExportEvent::Finished {
                record: Box::new(record.clone()),
            });
        }
        Some(record)
    }

    /// Unbind from the consumer. Same as dropping the session.
    pub fn teardown(self) {}
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        // Detach the outlets first so a task still running on another worker
        // cannot publish between the two steps.
        self.writer.close();
        self.guard.release();
    }
}
