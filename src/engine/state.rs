//! Single write path for session state and notifications.
//!
//! Every state change and every event an attempt produces goes through a
//! [`StateWriter`]. Closing the writer (session teardown) drops both outlets
//! under the same lock the writes take, so once `close` returns nothing an
//! attempt does can reach the consumer any more.

use crate::model::{ExportEvent, ExportProgress, ExportSessionState, InfoEvent, NoticeLevel};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

struct Outlet {
    state_tx: watch::Sender<ExportSessionState>,
    events: mpsc::UnboundedSender<ExportEvent>,
}

#[derive(Clone)]
pub struct StateWriter {
    outlet: Arc<Mutex<Option<Outlet>>>,
}

impl StateWriter {
    pub fn new(
        events: mpsc::UnboundedSender<ExportEvent>,
    ) -> (Self, watch::Receiver<ExportSessionState>) {
        let (state_tx, state_rx) = watch::channel(ExportSessionState::default());
        let writer = Self {
            outlet: Arc::new(Mutex::new(Some(Outlet { state_tx, events }))),
        };
        (writer, state_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Outlet>> {
        // Writers never panic while holding the lock; recover the data if one did.
        self.outlet.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop both outlets. Later writes are silently discarded.
    pub fn close(&self) {
        self.lock().take();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Mark an attempt as started: `exporting = true`, no progress yet.
    pub fn begin(&self) {
        let guard = self.lock();
        let Some(outlet) = guard.as_ref() else { return };
        let mut flipped = false;
        outlet.state_tx.send_if_modified(|s| {
            flipped = !s.exporting;
            let had_progress = s.export_progress.take().is_some();
            s.exporting = true;
            flipped || had_progress
        });
        if flipped {
            let _ = outlet.events.send(ExportEvent::ExportingChanged(true));
        }
    }

    pub fn set_progress(&self, progress: ExportProgress) {
        let guard = self.lock();
        let Some(outlet) = guard.as_ref() else { return };
        outlet
            .state_tx
            .send_modify(|s| s.export_progress = Some(progress.clone()));
        let _ = outlet.events.send(ExportEvent::Progress(progress));
    }

    /// Reset to idle. `ExportingChanged(false)` is only emitted when the flag
    /// actually flips, so repeated calls within one attempt are harmless.
    pub fn finish(&self) {
        let guard = self.lock();
        let Some(outlet) = guard.as_ref() else { return };
        let mut flipped = false;
        outlet.state_tx.send_if_modified(|s| {
            flipped = s.exporting;
            let had_progress = s.export_progress.take().is_some();
            s.exporting = false;
            flipped || had_progress
        });
        if flipped {
            let _ = outlet.events.send(ExportEvent::ExportingChanged(false));
        }
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(ExportEvent::Notice {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, info: InfoEvent) {
        self.emit(ExportEvent::Info(info));
    }

    pub fn emit(&self, event: ExportEvent) {
        if let Some(outlet) = self.lock().as_ref() {
            let _ = outlet.events.send(event);
        }
    }
}
