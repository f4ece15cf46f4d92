use std::time::Duration;

/// Exponential backoff: the first retry waits `initial`, each later one doubles, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let delay = self.initial.saturating_mul(1u32 << shift);
        delay.min(self.max)
    }

    pub(crate) async fn wait(&self, retry: u32) {
        let delay = self.delay(retry);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy {
            max_retries: 6,
            initial: Duration::from_millis(100),
            max: Duration::from_millis(700),
        };

        let delays: Vec<u64> =
            (1..=5).map(|retry| policy.delay(retry).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 700, 700]);
        assert_eq!(policy.attempts(), 7);
    }

    #[test]
    fn large_retry_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(u32::MAX), policy.max);
    }
}
