use chrono::{Duration, Utc};
use deferflow::jobs::retry::{classify_error, next_delay_seconds, ErrorClass, RetryConfig};
use rand::{rngs::StdRng, SeedableRng};

fn no_jitter() -> RetryConfig {
    RetryConfig {
        base_seconds: 2,
        max_seconds: 60,
        jitter_pct: 0.0,
        max_retries: 3,
    }
}

#[test]
fn delay_doubles_then_caps() {
    let cfg = no_jitter();
    let mut rng = StdRng::seed_from_u64(7);

    let delays: Vec<i64> = (1..=7)
        .map(|n| next_delay_seconds(n, &cfg, &mut rng))
        .collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);

    assert_eq!(next_delay_seconds(500, &cfg, &mut rng), 60);
}

#[test]
fn jitter_stays_in_bounds() {
    let cfg = RetryConfig {
        jitter_pct: 0.2,
        ..no_jitter()
    };
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..200 {
        let d = next_delay_seconds(3, &cfg, &mut rng);
        assert!((6..=10).contains(&d), "delay {d} outside 8s +/- 20%");
    }
}

#[test]
fn retry_at_stops_after_max_retries() {
    let cfg = no_jitter();
    let mut rng = StdRng::seed_from_u64(1);
    let now = Utc::now();

    assert_eq!(cfg.retry_at(now, 0, &mut rng), Some(now + Duration::seconds(2)));
    assert_eq!(cfg.retry_at(now, 2, &mut rng), Some(now + Duration::seconds(8)));
    assert_eq!(cfg.retry_at(now, 3, &mut rng), None);
}

#[test]
fn classification() {
    assert_eq!(classify_error("TIMEOUT"), ErrorClass::Retryable);
    assert_eq!(classify_error("BAD_ARGS"), ErrorClass::NonRetryable);
    assert_eq!(classify_error("UNKNOWN_TASK"), ErrorClass::NonRetryable);
    assert_eq!(classify_error("SOMETHING_NEW"), ErrorClass::Retryable);
}
