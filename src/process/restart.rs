use std::time::{Duration, Instant};

/// Restart policy for a unit
///
/// Every exit that was not explicitly requested is followed by a relaunch
/// after a fixed delay. There is no backoff and no retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    delay: Duration,
}

impl RestartPolicy {
    /// Create a fixed-delay policy
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Check whether the unit relaunches after an exit
    pub fn should_restart(&self, stop_requested: bool) -> bool {
        !stop_requested
    }

    /// The earliest instant the next launch may begin
    ///
    /// Measured from the exit itself, so every failure in a burst is
    /// rate-limited by the same amount.
    pub fn resume_at(&self, exited_at: Instant) -> Instant {
        exited_at + self.delay
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_default() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_restart_unless_stop_requested() {
        let policy = RestartPolicy::fixed(Duration::from_millis(100));
        assert!(policy.should_restart(false));
        assert!(!policy.should_restart(true));
    }

    #[test]
    fn test_delay_is_flat() {
        let policy = RestartPolicy::fixed(Duration::from_millis(250));
        let exited_at = Instant::now();

        // The same delay applies no matter how many times the unit has failed
        for _ in 0..5 {
            assert_eq!(
                policy.resume_at(exited_at) - exited_at,
                Duration::from_millis(250)
            );
        }
    }

    #[test]
    fn test_zero_delay_resumes_immediately() {
        let policy = RestartPolicy::fixed(Duration::ZERO);
        let exited_at = Instant::now();
        assert_eq!(policy.resume_at(exited_at), exited_at);
    }
}
