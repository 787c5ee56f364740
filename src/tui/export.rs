//! File and history actions triggered from the TUI.

use crate::model::ExportRecord;
use crate::orchestrator;
use anyhow::Result;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Clipboard worker channel, started on first use.
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Post-process a finished attempt: history save per the auto-save toggle,
/// then a history reload.
pub fn handle_finished(state: &mut UiState, record: &ExportRecord) {
    let reload_size = (state.history.len() + 1).max(state.initial_history_load_size);
    let processed = orchestrator::process_export_completion(state.auto_save, reload_size, record);
    if !processed.messages.is_empty() {
        state.info = processed.messages.join("; ");
    }
    state.history = processed.history;
    if state.tab == 1 {
        state.history_selected = 0;
        state.history_scroll_offset = 0;
    }
    state.clamp_selection();
}

pub fn refresh_history(state: &mut UiState) {
    let reload_size = state.initial_history_load_size.max(state.history.len());
    match crate::storage::load_recent(reload_size) {
        Ok(history) => {
            let old_count = state.history.len();
            state.history = history;
            state.clamp_selection();
            let new_count = state.history.len();
            state.info = match new_count.cmp(&old_count) {
                std::cmp::Ordering::Greater => {
                    format!("Refreshed: {} new export(s)", new_count - old_count)
                }
                std::cmp::Ordering::Less => {
                    format!("Refreshed: {} export(s) removed", old_count - new_count)
                }
                std::cmp::Ordering::Equal => "Refreshed".into(),
            };
        }
        Err(e) => state.info = format!("Refresh failed: {e:#}"),
    }
}

pub fn delete_selected(state: &mut UiState) {
    let Some(record) = state.selected_record().cloned() else {
        return;
    };
    match crate::storage::delete_record(&record) {
        Ok(()) => {
            state.history.remove(state.history_selected);
            state.clamp_selection();
            state.info = "Deleted".into();
        }
        Err(e) => state.info = format!("Delete failed: {e:#}"),
    }
}

pub fn copy_saved_path(state: &mut UiState) {
    let Some(path) = state.last_saved_path.as_ref() else {
        state.info = "No saved file path to copy yet".into();
        return;
    };
    let path = path.to_string_lossy().to_string();
    state.info = match copy_to_clipboard(&path) {
        Ok(()) => {
            let shown = if path.chars().count() > 60 {
                let head: String = path.chars().take(57).collect();
                format!("{head}...")
            } else {
                path
            };
            format!("✓ Copied to clipboard: {shown}")
        }
        Err(e) => format!("Clipboard copy failed: {e:#}"),
    };
}

/// Clipboard contents are owned by the process that set them on X11/Wayland,
/// so a worker thread holds each clipboard for a while after setting it.
fn clipboard_worker() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                if let Ok(mut clipboard) = arboard::Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });
        tx
    })
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    clipboard_worker()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard worker stopped"))
}
