use crate::model::ExportStrategy;

/// Small exports run as one request; anything above the threshold becomes a
/// background job whose progress can be observed.
pub fn select_strategy(total_records: u64, sync_threshold: u64) -> ExportStrategy {
    if total_records <= sync_threshold {
        ExportStrategy::Direct
    } else {
        ExportStrategy::Job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_SYNC_THRESHOLD;

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(select_strategy(0, DEFAULT_SYNC_THRESHOLD), ExportStrategy::Direct);
        assert_eq!(select_strategy(200, DEFAULT_SYNC_THRESHOLD), ExportStrategy::Direct);
        assert_eq!(select_strategy(201, DEFAULT_SYNC_THRESHOLD), ExportStrategy::Job);
        assert_eq!(select_strategy(u64::MAX, DEFAULT_SYNC_THRESHOLD), ExportStrategy::Job);
    }

    #[test]
    fn test_zero_threshold_always_uses_jobs_for_data() {
        assert_eq!(select_strategy(1, 0), ExportStrategy::Job);
        assert_eq!(select_strategy(0, 0), ExportStrategy::Direct);
    }
}
