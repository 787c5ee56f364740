use crate::model::{
    ExportEvent, ExportFilters, ExportProgress, ExportRecord, ExportRequest, ExportSessionState,
    ExportStrategy, JobId, NoticeLevel,
};
use ratatui::style::{Color, Style};
use std::collections::VecDeque;
use std::path::PathBuf;

/// Notices kept on screen.
pub const NOTICE_LIMIT: usize = 50;

pub struct UiState {
    pub tab: usize,
    pub info: String,

    /// Filters and listing size the next export is started with.
    pub filters: ExportFilters,
    pub total_records: u64,
    pub sync_threshold: u64,

    /// Mirror of the session state, refreshed from its watch channel.
    pub session: ExportSessionState,
    pub strategy: Option<ExportStrategy>,
    pub job_id: Option<JobId>,
    pub notices: VecDeque<(NoticeLevel, String)>,

    pub last_record: Option<ExportRecord>,
    pub last_saved_path: Option<PathBuf>,
    pub history: Vec<ExportRecord>,
    pub history_selected: usize, // 0 = most recent
    pub history_scroll_offset: usize,
    pub initial_history_load_size: usize,
    pub auto_save: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            info: String::new(),
            filters: ExportFilters::default(),
            total_records: 0,
            sync_threshold: crate::model::DEFAULT_SYNC_THRESHOLD,
            session: ExportSessionState::default(),
            strategy: None,
            job_id: None,
            notices: VecDeque::new(),
            last_record: None,
            last_saved_path: None,
            history: Vec::new(),
            history_selected: 0,
            history_scroll_offset: 0,
            initial_history_load_size: 66,
            auto_save: true,
        }
    }
}

impl UiState {
    /// Snapshot of the current filters for a new attempt.
    pub fn request(&self) -> ExportRequest {
        ExportRequest {
            filters: self.filters.clone(),
            total_records: self.total_records,
        }
    }

    /// Strategy the next export will use.
    pub fn planned_strategy(&self) -> ExportStrategy {
        crate::engine::strategy::select_strategy(self.total_records, self.sync_threshold)
    }

    pub fn push_notice(&mut self, level: NoticeLevel, message: String) {
        if self.notices.len() == NOTICE_LIMIT {
            self.notices.pop_front();
        }
        self.notices.push_back((level, message));
    }

    /// Apply a session event. `Finished` needs storage access and is handled
    /// by the caller; here it only records the outcome.
    pub fn apply_event(&mut self, ev: &ExportEvent) {
        match ev {
            ExportEvent::Started { strategy, .. } => {
                self.strategy = Some(*strategy);
                self.job_id = None;
                self.info = match strategy {
                    ExportStrategy::Direct => "Exporting…".into(),
                    ExportStrategy::Job => "Submitting export job…".into(),
                };
            }
            ExportEvent::JobSubmitted { job_id } => {
                self.job_id = Some(job_id.clone());
                self.info = format!("Job {job_id} submitted");
            }
            ExportEvent::ExportingChanged(exporting) => {
                self.session.exporting = *exporting;
                if !exporting {
                    self.session.export_progress = None;
                }
            }
            ExportEvent::Progress(p) => {
                self.session.export_progress = Some(p.clone());
            }
            ExportEvent::Notice { level, message } => {
                self.push_notice(*level, message.clone());
            }
            ExportEvent::Info(info) => {
                self.info = info.to_message();
            }
            ExportEvent::Finished { record } => {
                if let Some(path) = record.saved_path() {
                    self.last_saved_path = Some(path.to_path_buf());
                    self.info = format!("Saved: {} (press 'y' to copy path)", path.display());
                } else {
                    self.info = format!("Export {}", record.outcome.label());
                }
                self.last_record = Some((**record).clone());
            }
        }
    }

    pub fn progress(&self) -> Option<&ExportProgress> {
        self.session.export_progress.as_ref()
    }

    pub fn selected_record(&self) -> Option<&ExportRecord> {
        self.history.get(self.history_selected)
    }

    pub fn select_prev(&mut self) {
        if self.history_selected > 0 {
            self.history_selected -= 1;
            if self.history_selected < self.history_scroll_offset {
                self.history_scroll_offset = self.history_selected;
            }
        }
    }

    pub fn select_next(&mut self, visible: usize) {
        if self.history_selected + 1 < self.history.len() {
            self.history_selected += 1;
            let visible = visible.max(1);
            if self.history_selected >= self.history_scroll_offset + visible {
                self.history_scroll_offset = self.history_selected + 1 - visible;
            }
        }
    }

    /// Keep selection and scroll inside the history after it changed.
    pub fn clamp_selection(&mut self) {
        if self.history.is_empty() {
            self.history_selected = 0;
            self.history_scroll_offset = 0;
            return;
        }
        let last = self.history.len() - 1;
        self.history_selected = self.history_selected.min(last);
        self.history_scroll_offset = self.history_scroll_offset.min(self.history_selected);
    }
}

pub fn notice_style(level: NoticeLevel) -> Style {
    match level {
        NoticeLevel::Info => Style::default().fg(Color::Gray),
        NoticeLevel::Success => Style::default().fg(Color::Green),
        NoticeLevel::Error => Style::default().fg(Color::Red),
    }
}
