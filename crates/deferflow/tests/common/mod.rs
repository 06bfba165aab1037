use std::sync::Arc;

use chrono::{TimeZone, Utc};
use deferflow::clock::ManualClock;
use deferflow::jobs::{Job, NewJob};
use deferflow::InMemoryConnector;
use serde_json::json;

/// Connector on a manual clock pinned at 2024-01-01T00:00:00Z.
pub fn setup() -> (InMemoryConnector, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let connector = InMemoryConnector::with_clock(Arc::new(clock.clone()));
    (connector, clock)
}

#[allow(dead_code)]
pub async fn defer(connector: &InMemoryConnector, queue: &str, task: &str) -> Job {
    connector
        .defer_job(NewJob::new(queue, task, json!({})))
        .await
        .expect("failed to defer job")
}

#[allow(dead_code)]
pub async fn defer_locked(connector: &InMemoryConnector, queue: &str, lock: &str) -> Job {
    connector
        .defer_job(NewJob::new(queue, "locked_task", json!({})).lock(lock))
        .await
        .expect("failed to defer locked job")
}
