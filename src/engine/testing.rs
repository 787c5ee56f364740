//! Scripted in-memory export service for engine and session tests.

use super::service::ExportService;
use crate::error::ServiceError;
use crate::model::{ExportFile, ExportFilters, JobId, JobSnapshot, JobStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) type PollReply = Result<JobSnapshot, ServiceError>;

pub(crate) fn snapshot(status: JobStatus, progress: f64, message: &str) -> PollReply {
    Ok(JobSnapshot {
        status,
        progress,
        message: message.into(),
        filename: None,
    })
}

pub(crate) fn completed(filename: &str) -> PollReply {
    Ok(JobSnapshot {
        status: JobStatus::Completed,
        progress: 100.0,
        message: "done".into(),
        filename: Some(filename.into()),
    })
}

pub(crate) fn poll_error() -> PollReply {
    Err(ServiceError::Status {
        status: 502,
        body: "bad gateway".into(),
    })
}

#[derive(Default)]
struct Calls {
    direct: Vec<ExportFilters>,
    submit: Vec<ExportFilters>,
    query_at: Vec<Instant>,
    download: Vec<(JobId, String)>,
}

/// Replies are consumed in order; once the poll script runs out every query
/// reports a running job at 50%.
pub(crate) struct ScriptedService {
    polls: Mutex<VecDeque<PollReply>>,
    fail_direct: bool,
    fail_submit: bool,
    fail_download: bool,
    latency: Duration,
    calls: Mutex<Calls>,
}

impl ScriptedService {
    pub fn new(polls: Vec<PollReply>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            fail_direct: false,
            fail_submit: false,
            fail_download: false,
            latency: Duration::ZERO,
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn failing_direct(mut self) -> Self {
        self.fail_direct = true;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    /// Every call takes this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn direct_calls(&self) -> Vec<ExportFilters> {
        self.calls.lock().unwrap().direct.clone()
    }

    pub fn submit_calls(&self) -> Vec<ExportFilters> {
        self.calls.lock().unwrap().submit.clone()
    }

    pub fn query_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().query_at.clone()
    }

    pub fn query_count(&self) -> usize {
        self.calls.lock().unwrap().query_at.len()
    }

    pub fn download_calls(&self) -> Vec<(JobId, String)> {
        self.calls.lock().unwrap().download.clone()
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn unavailable() -> ServiceError {
    ServiceError::Status {
        status: 503,
        body: "unavailable".into(),
    }
}

#[async_trait]
impl ExportService for ScriptedService {
    async fn export_direct(&self, filters: &ExportFilters) -> Result<ExportFile, ServiceError> {
        self.calls.lock().unwrap().direct.push(filters.clone());
        self.delay().await;
        if self.fail_direct {
            return Err(unavailable());
        }
        Ok(ExportFile {
            filename: "direct.xlsx".into(),
            bytes: bytes::Bytes::from_static(b"direct"),
        })
    }

    async fn submit_job(&self, filters: &ExportFilters) -> Result<JobId, ServiceError> {
        self.calls.lock().unwrap().submit.push(filters.clone());
        self.delay().await;
        if self.fail_submit {
            return Err(unavailable());
        }
        Ok(JobId("job-1".into()))
    }

    async fn query_job(&self, _job_id: &JobId) -> Result<JobSnapshot, ServiceError> {
        self.calls.lock().unwrap().query_at.push(Instant::now());
        self.delay().await;
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| snapshot(JobStatus::Running, 50.0, "working"))
    }

    async fn download_result(
        &self,
        job_id: &JobId,
        filename: &str,
    ) -> Result<ExportFile, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .download
            .push((job_id.clone(), filename.to_string()));
        self.delay().await;
        if self.fail_download {
            return Err(unavailable());
        }
        Ok(ExportFile {
            filename: filename.to_string(),
            bytes: bytes::Bytes::from_static(b"job"),
        })
    }
}

pub(crate) struct TestHarness {
    pub dir: tempfile::TempDir,
    pub state: tokio::sync::watch::Receiver<crate::model::ExportSessionState>,
    pub events: tokio::sync::mpsc::UnboundedReceiver<crate::model::ExportEvent>,
}

impl TestHarness {
    pub fn drain_events(&mut self) -> Vec<crate::model::ExportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

/// An attempt context writing into a fresh temp dir with default tuning.
pub(crate) fn context(
    service: std::sync::Arc<ScriptedService>,
) -> (super::AttemptContext, TestHarness) {
    let dir = tempfile::tempdir().unwrap();
    let (events_tx, events) = tokio::sync::mpsc::unbounded_channel();
    let (writer, state) = super::state::StateWriter::new(events_tx);
    let tuning = crate::model::ExportTuning {
        output_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let ctx = super::AttemptContext {
        service,
        tuning,
        state: writer,
        cancel: tokio_util::sync::CancellationToken::new(),
    };
    (ctx, TestHarness { dir, state, events })
}
