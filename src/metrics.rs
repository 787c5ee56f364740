use crate::model::PollSummary;

/// Compute metrics (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Summarise one attempt's status queries; `rtt_ms` holds successful round trips only.
pub fn poll_summary(
    polls: u32,
    failures: u32,
    max_consecutive_failures: u32,
    rtt_ms: &[f64],
) -> PollSummary {
    let (mean, median, p25, p75) = match compute_metrics(rtt_ms) {
        Some((mean, median, p25, p75)) => (Some(mean), Some(median), Some(p25), Some(p75)),
        // A single sample is still worth reporting as the mean/median.
        None => {
            let only = rtt_ms.first().copied();
            (only, only, None, None)
        }
    };
    PollSummary {
        polls,
        failures,
        max_consecutive_failures,
        mean_rtt_ms: mean,
        median_rtt_ms: median,
        p25_rtt_ms: p25,
        p75_rtt_ms: p75,
    }
}
