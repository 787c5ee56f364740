use super::AttemptContext;
use crate::error::ExportError;
use crate::model::{ExportFile, ExportOutcome, InfoEvent, JobId, NoticeLevel};
use std::path::PathBuf;
use tracing::{error, info};

/// Write a file the service handed back into the output directory.
pub(crate) fn save_file(ctx: &AttemptContext, file: &ExportFile) -> Result<PathBuf, ExportError> {
    let path = crate::storage::save_export_file(&ctx.tuning.output_dir, file)?;
    info!(path = %path.display(), bytes = file.bytes.len(), "export saved");
    ctx.state.info(InfoEvent::Saved { path: path.clone() });
    Ok(path)
}

/// Fetch and save the result of a completed job. State has already been
/// reset by the poller; a failure here is reported but not retried.
pub(crate) async fn handle_completed(
    ctx: &AttemptContext,
    job_id: &JobId,
    filename: Option<String>,
) -> ExportOutcome {
    let filename = filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| format!("{job_id}.xlsx"));

    ctx.state
        .info(InfoEvent::Message(format!("Downloading {filename}")));
    let Some(result) = ctx.call(ctx.service.download_result(job_id, &filename)).await else {
        return ExportOutcome::Cancelled;
    };

    let saved = result
        .map_err(ExportError::Download)
        .and_then(|file| save_file(ctx, &file));
    match saved {
        Ok(path) => {
            ctx.state.notify(NoticeLevel::Success, "Export completed");
            ExportOutcome::Completed { path }
        }
        Err(err) => {
            error!(%job_id, "{err}");
            let message = err.to_string();
            ctx.state.notify(NoticeLevel::Error, message.clone());
            ExportOutcome::DownloadFailed { message }
        }
    }
}
