use std::collections::HashMap;

use deferflow::config::Config;

fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn defaults_when_nothing_is_set() {
    let cfg = from_pairs(&[]).unwrap();

    assert_eq!(cfg.worker_id, "worker-1");
    assert_eq!(cfg.queues, None);
    assert_eq!(cfg.poll_interval_ms, 250);
    assert_eq!(cfg.stalled_after_secs, 30 * 60);
    assert_eq!(cfg.retention_hours, 24 * 7);
    assert_eq!(cfg.maintenance_interval_secs, 60);
    assert_eq!(cfg.admin_addr, None);
    assert_eq!(cfg.seed_jobs, 0);
}

#[test]
fn prefixed_vars_win_over_fallbacks() {
    let cfg = from_pairs(&[
        ("DEFERFLOW_WORKER_ID", "w-7"),
        ("WORKER_ID", "ignored"),
        ("QUEUES", " emails, ,reports "),
        ("STALLED_AFTER_SECS", "90"),
        ("DEFERFLOW_ADMIN_ADDR", "127.0.0.1:8080"),
    ])
    .unwrap();

    assert_eq!(cfg.worker_id, "w-7");
    assert_eq!(
        cfg.queues,
        Some(vec!["emails".to_string(), "reports".to_string()])
    );
    assert_eq!(cfg.stalled_after_secs, 90);
    assert_eq!(cfg.admin_addr.as_deref(), Some("127.0.0.1:8080"));
}

#[test]
fn blank_values_fall_through() {
    let cfg = from_pairs(&[
        ("DEFERFLOW_WORKER_ID", "   "),
        ("HOSTNAME", "box-3"),
        ("QUEUES", ","),
        ("ADMIN_ADDR", "off"),
    ])
    .unwrap();

    assert_eq!(cfg.worker_id, "box-3");
    assert_eq!(cfg.queues, None);
    assert_eq!(cfg.admin_addr, None);
}

#[test]
fn invalid_numbers_are_errors() {
    assert!(from_pairs(&[("POLL_INTERVAL_MS", "soon")]).is_err());
    assert!(from_pairs(&[("STALLED_AFTER_SECS", "0")]).is_err());
    assert!(from_pairs(&[("RETENTION_HOURS", "-1")]).is_err());
}
