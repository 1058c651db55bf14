//! Confirmation and retry policies, and the `[reconciler]` config table
//! they are built from.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

/// Tunables for the reconciler and its background workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Blocks (including the one holding the transaction) required before a
    /// vote is verified.
    pub confirmation_depth: u64,
    /// A vote still unconfirmed this long after submission fails.
    pub confirmation_timeout_secs: u64,
    /// Retries after the first ledger submission attempt.
    pub submit_retries: usize,
    pub submit_attempt_timeout_ms: u64,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Retries of the vote write after the ledger accepted the transaction.
    pub commit_retries: usize,
    /// Timeout for status, head and block-hash queries.
    pub query_timeout_ms: u64,
    /// How often the confirmation worker sweeps pending votes.
    pub poll_interval_ms: u64,
    /// How often the audit worker re-checks recent verified votes.
    pub audit_interval_secs: u64,
    /// Only votes verified within this window are re-audited.
    pub audit_window_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 12,
            confirmation_timeout_secs: 600,
            submit_retries: 3,
            submit_attempt_timeout_ms: 10_000,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            commit_retries: 3,
            query_timeout_ms: 10_000,
            poll_interval_ms: 5_000,
            audit_interval_secs: 60,
            audit_window_secs: 3_600,
        }
    }
}

impl ReconcilerConfig {
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            depth: self.confirmation_depth.max(1),
            timeout_secs: self.confirmation_timeout_secs,
            query_timeout: Duration::from_millis(self.query_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.submit_retries,
            commit_retries: self.commit_retries,
            attempt_timeout: Duration::from_millis(self.submit_attempt_timeout_ms),
            min_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_secs)
    }
}

/// When a pending vote counts as confirmed, and when it gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub depth: u64,
    pub timeout_secs: u64,
    pub query_timeout: Duration,
}

/// Bounded exponential backoff around ledger submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub commit_retries: usize,
    pub attempt_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries)
    }

    pub fn commit_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.commit_retries)
    }

    /// Worst-case time one submission holds its ballot reservation: every
    /// ledger attempt times out and every backoff sleeps its maximum.
    pub fn submission_budget(&self) -> Duration {
        let times = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let attempts = times(self.max_retries).saturating_add(1);
        let sleeps = times(self.max_retries.saturating_add(self.commit_retries));
        self.attempt_timeout
            .saturating_mul(attempts)
            .saturating_add(self.max_delay.saturating_mul(sleeps))
    }

    /// Age after which a reservation with no vote behind it is treated as
    /// left over from a crashed process.
    pub fn stale_reservation_secs(&self) -> u64 {
        self.submission_budget().saturating_mul(2).as_secs().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReconcilerConfig::default();
        let confirm = config.confirmation_policy();
        assert_eq!(confirm.depth, 12);
        assert_eq!(confirm.timeout_secs, 600);
        assert_eq!(config.audit_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn stale_reservations_outlive_the_slowest_submission() {
        let retry = ReconcilerConfig::default().retry_policy();
        // 4 attempts of 10s, 3 + 3 backoffs of at most 5s.
        assert_eq!(retry.submission_budget(), Duration::from_secs(70));
        assert_eq!(retry.stale_reservation_secs(), 140);
        assert_eq!(retry.commit_retries, 3);
    }

    #[test]
    fn zero_depth_still_needs_inclusion() {
        let config = ReconcilerConfig {
            confirmation_depth: 0,
            ..Default::default()
        };
        assert_eq!(config.confirmation_policy().depth, 1);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let config: ReconcilerConfig =
            serde_json::from_str(r#"{ "confirmation_depth": 3 }"#).unwrap();
        assert_eq!(config.confirmation_depth, 3);
        assert_eq!(config.audit_window_secs, 3_600);
    }
}
