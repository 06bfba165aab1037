mod common;

use chrono::Duration;
use common::{defer, setup};
use deferflow::jobs::{Job, JobStatus};
use deferflow::{InMemoryConnector, StoreError};

async fn run_to(connector: &InMemoryConnector, queue: &str, status: JobStatus) -> Job {
    let job = defer(connector, queue, "t").await;
    let fetched = connector.fetch_job(None).await.unwrap().unwrap();
    assert_eq!(fetched.id, job.id);
    connector.finish_job(job.id, status, None).await.unwrap();
    job
}

#[tokio::test]
async fn deletes_old_finished_jobs_and_their_events() {
    let (connector, clock) = setup();

    let old_ok = run_to(&connector, "default", JobStatus::Succeeded).await;
    let old_failed = run_to(&connector, "default", JobStatus::Failed).await;
    let old_pending = defer(&connector, "default", "t").await;

    clock.advance(Duration::hours(48));
    let recent_ok = run_to(&connector, "default", JobStatus::Succeeded).await;

    connector
        .delete_old_jobs(24, None, &[JobStatus::Succeeded])
        .await
        .unwrap();

    assert!(connector.job(old_ok.id).await.is_none());
    assert!(matches!(
        connector.job_events(old_ok.id).await.unwrap_err(),
        StoreError::JobNotFound(_)
    ));

    // wrong status, too recent, or not finished
    assert!(connector.job(old_failed.id).await.is_some());
    assert!(connector.job(recent_ok.id).await.is_some());
    assert!(connector.job(old_pending.id).await.is_some());
    assert_eq!(connector.job_events(old_failed.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn deletes_every_listed_status() {
    let (connector, clock) = setup();
    run_to(&connector, "default", JobStatus::Succeeded).await;
    run_to(&connector, "default", JobStatus::Failed).await;
    clock.advance(Duration::hours(2));

    connector
        .delete_old_jobs(1, None, &[JobStatus::Succeeded, JobStatus::Failed])
        .await
        .unwrap();

    assert!(connector.finished_jobs().await.is_empty());
}

#[tokio::test]
async fn respects_queue_filter() {
    let (connector, clock) = setup();
    let q1 = run_to(&connector, "q1", JobStatus::Succeeded).await;
    let q2 = run_to(&connector, "q2", JobStatus::Succeeded).await;
    clock.advance(Duration::hours(2));

    connector
        .delete_old_jobs(1, Some("q1"), &[JobStatus::Succeeded])
        .await
        .unwrap();

    assert!(connector.job(q1.id).await.is_none());
    assert!(connector.job(q2.id).await.is_some());
}

#[tokio::test]
async fn age_is_measured_from_last_event() {
    let (connector, clock) = setup();
    let job = defer(&connector, "default", "t").await;
    connector.fetch_job(None).await.unwrap().unwrap();

    // deferred long ago, finished just now
    clock.advance(Duration::hours(10));
    connector
        .finish_job(job.id, JobStatus::Succeeded, None)
        .await
        .unwrap();

    connector
        .delete_old_jobs(1, None, &[JobStatus::Succeeded])
        .await
        .unwrap();
    assert!(connector.job(job.id).await.is_some());
}

#[tokio::test]
async fn refuses_to_delete_unfinished_statuses() {
    let (connector, clock) = setup();
    let pending = defer(&connector, "default", "t").await;
    clock.advance(Duration::hours(2));

    let err = connector
        .delete_old_jobs(1, None, &[JobStatus::Todo])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert!(connector.job(pending.id).await.is_some());
}

#[tokio::test]
async fn deleted_ids_are_not_reused() {
    let (connector, clock) = setup();
    let old = run_to(&connector, "default", JobStatus::Succeeded).await;
    clock.advance(Duration::hours(2));
    connector
        .delete_old_jobs(1, None, &[JobStatus::Succeeded])
        .await
        .unwrap();

    let next = defer(&connector, "default", "t").await;
    assert!(next.id > old.id);
}

#[tokio::test]
async fn age_beyond_representable_time_deletes_nothing() {
    let (connector, clock) = setup();
    let job = run_to(&connector, "default", JobStatus::Succeeded).await;
    clock.advance(Duration::days(365));

    for hours in [10_000_000_000, i64::MAX] {
        connector
            .delete_old_jobs(hours, None, &[JobStatus::Succeeded])
            .await
            .unwrap();
        assert!(connector.job(job.id).await.is_some(), "age {hours}h");
    }

    connector
        .delete_old_jobs(24, None, &[JobStatus::Succeeded])
        .await
        .unwrap();
    assert!(connector.job(job.id).await.is_none());
}
