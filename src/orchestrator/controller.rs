//! Export lifecycle controller.
//!
//! Owns the [`ExportSession`] for an interactive frontend and turns UI
//! commands into session calls. Session events reach the frontend through the
//! channel the session was built with.

use crate::model::ExportRequest;
use crate::session::ExportSession;
use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Commands emitted by UI layers to control exports.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Start an export with this snapshot of the filters.
    Start(ExportRequest),
    Cancel,
    Quit,
}

/// Drive the session until the UI quits or goes away. Quitting tears the
/// session down: a running attempt is cancelled and nothing it does after
/// that reaches the UI.
pub(crate) async fn run_controller(
    mut session: ExportSession,
    initial: Option<ExportRequest>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    if let Some(request) = initial {
        // A rejection is already reported through the session's notices.
        let _ = session.start(request);
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start(request)) => {
                        let _ = session.start(request);
                    }
                    Some(UiCommand::Cancel) => {
                        if session.is_active() {
                            session.cancel().await;
                        } else {
                            debug!("cancel requested with no export running");
                        }
                    }
                    Some(UiCommand::Quit) | None => break,
                }
            }
            // The handle stays in the session until this branch wins, so a
            // command arriving first never loses the attempt.
            record = async {
                if session.has_attempt() {
                    session.wait().await
                } else {
                    futures::future::pending().await
                }
            } => {
                if let Some(record) = record {
                    debug!(outcome = record.outcome.label(), "export collected");
                }
            }
        }
    }

    session.teardown();
    Ok(())
}
