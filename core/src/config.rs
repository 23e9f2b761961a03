//! Runtime configuration.
//!
//! Durations are kept in milliseconds and converted to ticks of the
//! selected clock when used.

use log::LevelFilter;

use crate::retry::BACKOFF_LIMIT;
use crate::time::TickRate;

/// Retry timer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Cap on the backoff shift
    pub backoff_limit: u32,
    /// Base delay for timers that don't pick their own (ms)
    pub default_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_limit: BACKOFF_LIMIT,
            default_timeout_ms: 1_000,
        }
    }
}

/// Timeouts for network operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect retry interval, doubled on each expiry (ms)
    pub connect_ms: u64,
    /// Connect expiries tolerated before giving up
    pub connect_retries: u32,
    /// Graceful close budget before aborting (ms)
    pub close_ms: u64,
    /// Overall limit for a foreground job, 0 for none (ms)
    pub job_ms: u64,
    /// Scheduler steps longer than this are logged, 0 to disable (ms)
    pub step_warning_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: 1_000,
            connect_retries: 4,
            close_ms: 10_000,
            job_ms: 0,
            step_warning_ms: 100,
        }
    }
}

impl Timeouts {
    /// TCP connect base interval
    #[inline]
    pub fn tcp_connect(&self, rate: TickRate) -> u64 {
        rate.ms_to_ticks(self.connect_ms)
    }

    /// TCP close timeout
    #[inline]
    pub fn tcp_close(&self, rate: TickRate) -> u64 {
        rate.ms_to_ticks(self.close_ms)
    }

    /// Foreground job limit, if any
    #[inline]
    pub fn job(&self, rate: TickRate) -> Option<u64> {
        (self.job_ms != 0).then(|| rate.ms_to_ticks(self.job_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub retry: RetryConfig,
    pub timeouts: Timeouts,
    pub log_level: LevelFilter,
    /// Interval between progress reports to the console (ms)
    pub progress_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeouts: Timeouts::default(),
            log_level: LevelFilter::Info,
            progress_interval_ms: 500,
        }
    }
}

impl Config {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_progress_interval_ms(mut self, ms: u64) -> Self {
        self.progress_interval_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_standard_backoff_limit() {
        let config = Config::default();
        assert_eq!(config.retry.backoff_limit, 7);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn timeouts_convert_through_rate() {
        let rate = TickRate::new(1_000_000);
        let timeouts = Timeouts {
            connect_ms: 250,
            job_ms: 0,
            ..Timeouts::default()
        };
        assert_eq!(timeouts.tcp_connect(rate), 250_000);
        assert_eq!(timeouts.tcp_close(rate), 10_000_000);
        assert_eq!(timeouts.job(rate), None);

        let limited = Config::default().with_timeouts(Timeouts {
            job_ms: 30_000,
            ..timeouts
        });
        assert_eq!(limited.timeouts.job(rate), Some(30_000_000));
    }
}
