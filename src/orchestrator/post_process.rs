//! Post-export processing utilities.
//!
//! Handles history save and refresh after an attempt finishes.

use crate::model::ExportRecord;
use crate::storage;
use tracing::warn;

/// Result of post-export processing, ready for presentation layers.
pub(crate) struct ProcessedExport {
    pub messages: Vec<String>,
    pub history: Vec<ExportRecord>,
    pub history_path: Option<std::path::PathBuf>,
}

/// Record a finished attempt in the history (when `auto_save` is on) and
/// reload the newest `history_load` entries.
pub(crate) fn process_export_completion(
    auto_save: bool,
    history_load: usize,
    record: &ExportRecord,
) -> ProcessedExport {
    let mut messages = Vec::new();

    let history_path = if auto_save {
        match storage::save_record(record) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("failed to save export record: {e:#}");
                messages.push(format!("History save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    let history = if history_load > 0 {
        storage::load_recent(history_load).unwrap_or_default()
    } else {
        Vec::new()
    };

    ProcessedExport {
        messages,
        history,
        history_path,
    }
}
