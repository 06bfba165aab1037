use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Backoff used by workers to pick the `scheduled_at` of a retry.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
    /// Retries allowed after the first run. A job with `attempts` equal to
    /// this is failed instead of retried.
    pub max_retries: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
            max_retries: 5,
        }
    }
}

impl RetryConfig {
    /// When the job should run again, or `None` once retries are used up.
    /// `attempts` is the job's retry count before this failure.
    pub fn retry_at(
        &self,
        now: DateTime<Utc>,
        attempts: i32,
        rng: &mut impl Rng,
    ) -> Option<DateTime<Utc>> {
        if attempts >= self.max_retries {
            return None;
        }
        let delay = next_delay_seconds(attempts + 1, self, rng);
        Some(now + Duration::seconds(delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

pub fn classify_error(code: &str) -> ErrorClass {
    match code {
        "TIMEOUT" | "DEPENDENCY_DOWN" | "RATE_LIMIT" => ErrorClass::Retryable,
        "BAD_ARGS" | "UNKNOWN_TASK" => ErrorClass::NonRetryable,
        _ => ErrorClass::Retryable,
    }
}

pub fn next_delay_seconds(attempt_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempt_no = attempt_no.max(1) as u32;
    let exp = attempt_no.saturating_sub(1);

    // 2^exp; past 2^62 the cap below takes over anyway.
    let pow2 = if exp < 62 { 1_i64 << exp } else { i64::MAX };
    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}
