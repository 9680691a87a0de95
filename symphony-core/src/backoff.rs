// ABOUTME: Retry schedule the datafeed poller follows after a read fails transiently
// ABOUTME: The wait grows geometrically per failed read, is capped, and resets on the first good read

use std::time::Duration;

/// How long the poller waits between failed datafeed reads.
///
/// The n-th consecutive failed read waits `initial_delay * multiplier^(n-1)`,
/// never longer than `max_delay`. With `max_retries` set, the read that would
/// exceed it ends the poller instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// 0 keeps retrying forever
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            max_retries: 0,
        }
    }
}

/// Failed-read streak of one poller run
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    failed_reads: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failed_reads: 0,
        }
    }

    /// A read came back; the next failure starts the schedule over
    pub fn record_success(&mut self) {
        self.failed_reads = 0;
    }

    /// Count a failed read and return how long to wait before reading again.
    /// `None` once the streak is longer than `max_retries`.
    pub fn record_failure(&mut self) -> Option<Duration> {
        let delay = self.next_delay();
        self.failed_reads = self.failed_reads.saturating_add(1);

        let limit = self.config.max_retries;
        if limit > 0 && self.failed_reads > limit {
            return None;
        }
        Some(delay)
    }

    /// As `record_failure`, but a server-supplied `Retry-After` stretches the wait
    pub fn record_failure_with_hint(&mut self, hint: Option<Duration>) -> Option<Duration> {
        let delay = self.record_failure()?;
        Some(match hint {
            Some(hint) if hint > delay => hint,
            _ => delay,
        })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failed_reads
    }

    /// Wait the next failed read would get
    pub fn next_delay(&self) -> Duration {
        let factor = self
            .config
            .multiplier
            .checked_pow(self.failed_reads)
            .unwrap_or(u32::MAX);
        self.config
            .initial_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_defaults_retry_forever_from_one_second() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, secs(1));
        assert_eq!(config.max_delay, secs(60));
        assert_eq!(config.multiplier, 2);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_read_retry_schedule() {
        let mut reads = BackoffState::new(BackoffConfig::default());

        let waits: Vec<Duration> = (0..8).filter_map(|_| reads.record_failure()).collect();
        assert_eq!(
            waits,
            [1, 2, 4, 8, 16, 32, 60, 60].map(secs).to_vec(),
            "doubles until the one-minute cap"
        );
        assert_eq!(reads.consecutive_failures(), 8);
    }

    #[test]
    fn test_recovered_read_restarts_schedule() {
        let mut reads = BackoffState::new(BackoffConfig::default());
        for _ in 0..5 {
            reads.record_failure();
        }
        assert_eq!(reads.next_delay(), secs(32));

        reads.record_success();
        assert_eq!(reads.consecutive_failures(), 0);
        assert_eq!(reads.record_failure(), Some(secs(1)));
    }

    #[test]
    fn test_gives_up_after_retry_limit() {
        let mut reads = BackoffState::new(BackoffConfig {
            max_retries: 2,
            ..BackoffConfig::default()
        });

        assert_eq!(reads.record_failure(), Some(secs(1)));
        assert_eq!(reads.record_failure(), Some(secs(2)));
        assert_eq!(reads.record_failure(), None);
        assert_eq!(reads.consecutive_failures(), 3);
    }

    #[test]
    fn test_retry_after_only_lengthens_the_wait() {
        let mut reads = BackoffState::new(BackoffConfig::default());
        assert_eq!(reads.record_failure_with_hint(Some(secs(30))), Some(secs(30)));
        assert_eq!(
            reads.record_failure_with_hint(Some(Duration::from_millis(5))),
            Some(secs(2))
        );
        assert_eq!(reads.record_failure_with_hint(None), Some(secs(4)));
    }

    #[test]
    fn test_long_streak_saturates_at_cap() {
        let mut reads = BackoffState::new(BackoffConfig {
            initial_delay: Duration::from_millis(250),
            max_delay: secs(5),
            multiplier: 3,
            max_retries: 0,
        });
        for _ in 0..100 {
            reads.record_failure();
        }
        assert_eq!(reads.record_failure(), Some(secs(5)));
    }
}
