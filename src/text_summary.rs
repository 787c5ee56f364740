//! Text summary builder for CLI output.

use crate::model::{ExportOutcome, ExportRecord, ExportStrategy};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn strategy_label(strategy: ExportStrategy) -> &'static str {
    match strategy {
        ExportStrategy::Direct => "direct",
        ExportStrategy::Job => "background job",
    }
}

/// Build a text summary for one finished attempt.
pub(crate) fn build_text_summary(record: &ExportRecord) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Export: {} records via {}",
        record.total_records,
        strategy_label(record.strategy)
    ));
    let owner = record.filters.owner_id.as_deref().unwrap_or("-");
    let search = record.filters.search.as_deref().unwrap_or("-");
    lines.push(format!("Filters: owner {owner} / search {search}"));
    if let Some(job_id) = record.job_id.as_ref() {
        lines.push(format!("Job: {job_id}"));
    }

    if let Some(poll) = record.poll.as_ref() {
        let mut line = format!(
            "Polls: {} ({} failed, longest failure run {})",
            poll.polls, poll.failures, poll.max_consecutive_failures
        );
        match (poll.mean_rtt_ms, poll.median_rtt_ms, poll.p25_rtt_ms, poll.p75_rtt_ms) {
            (Some(mean), Some(median), Some(p25), Some(p75)) => line.push_str(&format!(
                " rtt avg {mean:.1} med {median:.1} p25 {p25:.1} p75 {p75:.1} ms"
            )),
            (Some(mean), ..) => line.push_str(&format!(" rtt {mean:.1} ms")),
            _ => {}
        }
        lines.push(line);
    }

    let result = match &record.outcome {
        ExportOutcome::Completed { path } => format!("Saved: {}", path.display()),
        ExportOutcome::SyncFailed { message }
        | ExportOutcome::SubmissionFailed { message }
        | ExportOutcome::JobFailed { message }
        | ExportOutcome::DownloadFailed { message } => {
            format!("Failed ({}): {message}", record.outcome.label())
        }
        ExportOutcome::PollExhausted { failures } => {
            format!("Failed: progress query failed {failures} times in a row")
        }
        ExportOutcome::Cancelled => "Cancelled".to_string(),
        ExportOutcome::Rejected => "Rejected: another export is in progress".to_string(),
    };
    lines.push(result);
    lines.push(format!(
        "Duration: {:.1} s",
        record.duration_ms as f64 / 1000.0
    ));

    TextSummary { lines }
}
