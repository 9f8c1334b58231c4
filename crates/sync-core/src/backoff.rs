use std::time::Duration;

/// Doubling delay schedule applied between consecutive failed polls.
///
/// The first retry waits `base`, every further failure doubles the wait,
/// and no delay ever exceeds `ceiling`. No jitter is applied, so schedules
/// are reproducible. The sync loop resets its failure count on the first
/// successful poll, restarting the schedule from `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Duration,
}

impl BackoffPolicy {
    /// A schedule from `base` up to `ceiling`. A ceiling below the base is
    /// raised to it.
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Delay before the next poll, given how many polls in a row have
    /// failed before it (zero-based: pass 0 after the first failure).
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let doublings = consecutive_failures.min(31);
        let factor = 1_u32 << doublings;
        self.base.saturating_mul(factor).min(self.ceiling)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_waits_the_base_delay() {
        let policy = BackoffPolicy::new(Duration::from_millis(750), Duration::from_secs(30));
        assert_eq!(policy.delay(0), Duration::from_millis(750));
    }

    #[test]
    fn each_further_failure_doubles_the_wait() {
        let policy = BackoffPolicy::new(Duration::from_millis(300), Duration::from_secs(120));
        assert_eq!(policy.delay(1), Duration::from_millis(600));
        assert_eq!(policy.delay(4), Duration::from_millis(4_800));
    }

    #[test]
    fn schedule_flattens_at_the_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(9));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.delay(3), Duration::from_secs(9));
        assert_eq!(policy.delay(30), Duration::from_secs(9));
    }

    #[test]
    fn is_non_decreasing_up_to_the_ceiling() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for failures in 0..40 {
            let delay = policy.delay(failures);
            assert!(delay >= previous, "delay regressed after {failures} failures");
            assert!(delay <= policy.ceiling());
            previous = delay;
        }
    }

    #[test]
    fn extreme_failure_counts_saturate_instead_of_overflowing() {
        let policy = BackoffPolicy::new(Duration::from_secs(3), Duration::from_secs(45));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(45));
    }

    #[test]
    fn ceiling_below_base_is_raised_to_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(7), Duration::from_secs(5));
    }

    #[test]
    fn schedule_restarts_from_base_once_the_failure_count_resets() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(8), Duration::from_secs(60));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
    }
}
