use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Record count at or below which an export runs as a single request.
pub const DEFAULT_SYNC_THRESHOLD: u64 = 200;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub sync_threshold: u64,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    pub auto_save: bool,
}

impl ExportConfig {
    pub fn tuning(&self) -> ExportTuning {
        ExportTuning {
            sync_threshold: self.sync_threshold,
            poll_interval: self.poll_interval,
            max_poll_failures: self.max_poll_failures,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Knobs the engine needs for one attempt.
#[derive(Debug, Clone)]
pub struct ExportTuning {
    pub sync_threshold: u64,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub output_dir: PathBuf,
}

impl Default for ExportTuning {
    fn default() -> Self {
        Self {
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// One export invocation. The filters are moved into the attempt when it
/// starts, so later edits on the caller side never reach a running job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub filters: ExportFilters,
    pub total_records: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStrategy {
    /// Single request/response export.
    Direct,
    /// Background job observed by polling.
    Job,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Server-side job as observed through a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl JobSnapshot {
    /// Progress as a whole percentage; out-of-range or NaN values are clamped.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).round() as u8
    }

    pub fn to_progress(&self) -> ExportProgress {
        ExportProgress {
            progress: self.percent(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub progress: u8,
    pub message: String,
}

/// Caller-visible state of one export session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSessionState {
    pub exporting: bool,
    pub export_progress: Option<ExportProgress>,
}

/// File bytes handed back by the export service.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: bytes::Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExportEvent {
    Started {
        strategy: ExportStrategy,
        total_records: u64,
    },
    JobSubmitted {
        job_id: JobId,
    },
    /// Emitted only when the `exporting` flag actually flips.
    ExportingChanged(bool),
    Progress(ExportProgress),
    Notice {
        level: NoticeLevel,
        message: String,
    },
    Info(InfoEvent),
    Finished {
        // Box to keep ExportEvent small; the record carries filters and stats.
        record: Box<ExportRecord>,
    },
}

/// Structured info events emitted outside the notification path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Saved { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Saved { path } => format!("Saved: {}", path.display()),
        }
    }
}

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportOutcome {
    Completed { path: PathBuf },
    SyncFailed { message: String },
    SubmissionFailed { message: String },
    JobFailed { message: String },
    PollExhausted { failures: u32 },
    DownloadFailed { message: String },
    Cancelled,
    Rejected,
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportOutcome::Completed { .. } => "completed",
            ExportOutcome::SyncFailed { .. } => "export failed",
            ExportOutcome::SubmissionFailed { .. } => "submission failed",
            ExportOutcome::JobFailed { .. } => "job failed",
            ExportOutcome::PollExhausted { .. } => "progress query failed",
            ExportOutcome::DownloadFailed { .. } => "download failed",
            ExportOutcome::Cancelled => "cancelled",
            ExportOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    pub polls: u32,
    pub failures: u32,
    pub max_consecutive_failures: u32,
    pub mean_rtt_ms: Option<f64>,
    pub median_rtt_ms: Option<f64>,
    pub p25_rtt_ms: Option<f64>,
    pub p75_rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    #[serde(default)]
    pub timestamp_utc: String,
    pub request_id: String,
    pub base_url: String,
    pub filters: ExportFilters,
    pub total_records: u64,
    pub strategy: ExportStrategy,
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub outcome: ExportOutcome,
    #[serde(default)]
    pub poll: Option<PollSummary>,
    pub duration_ms: u64,
}

impl ExportRecord {
    pub fn saved_path(&self) -> Option<&std::path::Path> {
        match &self.outcome {
            ExportOutcome::Completed { path } => Some(path.as_path()),
            _ => None,
        }
    }
}
