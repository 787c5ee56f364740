use super::AttemptContext;
use crate::error::ExportError;
use crate::model::{ExportEvent, ExportFilters, ExportOutcome, ExportProgress, JobId, NoticeLevel};
use tracing::{info, warn};

pub(crate) const SUBMITTING_MESSAGE: &str = "Submitting export job";

/// Create the background job. On failure state is reset here and the
/// returned outcome is terminal: no polling follows.
pub(crate) async fn submit_job(
    ctx: &AttemptContext,
    filters: &ExportFilters,
) -> Result<JobId, ExportOutcome> {
    ctx.state.begin();

    let Some(result) = ctx.call(ctx.service.submit_job(filters)).await else {
        return Err(ExportOutcome::Cancelled);
    };

    match result {
        Ok(job_id) => {
            info!(%job_id, "export job submitted");
            ctx.state.set_progress(ExportProgress {
                progress: 0,
                message: SUBMITTING_MESSAGE.into(),
            });
            ctx.state.emit(ExportEvent::JobSubmitted {
                job_id: job_id.clone(),
            });
            Ok(job_id)
        }
        Err(e) => {
            ctx.state.finish();
            let err = ExportError::Submission(e);
            warn!("{err}");
            let message = err.to_string();
            ctx.state.notify(NoticeLevel::Error, message.clone());
            Err(ExportOutcome::SubmissionFailed { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{context, ScriptedService};
    use crate::model::ExportSessionState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_submit_initialises_progress() {
        let svc = Arc::new(ScriptedService::new(vec![]));
        let (ctx, harness) = context(svc.clone());
        let job = submit_job(&ctx, &ExportFilters::default()).await.unwrap();

        assert_eq!(job, JobId("job-1".into()));
        let state = harness.state.borrow().clone();
        assert!(state.exporting);
        assert_eq!(
            state.export_progress,
            Some(ExportProgress {
                progress: 0,
                message: SUBMITTING_MESSAGE.into()
            })
        );
    }

    #[tokio::test]
    async fn test_submit_failure_resets_state() {
        let svc = Arc::new(ScriptedService::new(vec![]).failing_submit());
        let (ctx, harness) = context(svc.clone());
        let outcome = submit_job(&ctx, &ExportFilters::default()).await.unwrap_err();

        assert!(matches!(outcome, ExportOutcome::SubmissionFailed { .. }));
        assert_eq!(*harness.state.borrow(), ExportSessionState::default());
        assert_eq!(svc.query_count(), 0);
    }
}
