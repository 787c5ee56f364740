use super::completion::save_file;
use super::AttemptContext;
use crate::error::ExportError;
use crate::model::{ExportFilters, ExportOutcome, NoticeLevel};
use tracing::{debug, warn};

/// Export in one request. `exporting` is raised before the call and lowered
/// right after it returns, whatever it returned.
pub(crate) async fn run_direct(ctx: &AttemptContext, filters: &ExportFilters) -> ExportOutcome {
    ctx.state.begin();
    debug!(?filters, "direct export");

    let Some(result) = ctx.call(ctx.service.export_direct(filters)).await else {
        return ExportOutcome::Cancelled;
    };
    ctx.state.finish();

    let saved = result
        .map_err(ExportError::SyncExport)
        .and_then(|file| save_file(ctx, &file));
    match saved {
        Ok(path) => {
            ctx.state.notify(NoticeLevel::Success, "Export completed");
            ExportOutcome::Completed { path }
        }
        Err(err) => {
            warn!("{err}");
            let message = err.to_string();
            ctx.state.notify(NoticeLevel::Error, message.clone());
            ExportOutcome::SyncFailed { message }
        }
    }
}
