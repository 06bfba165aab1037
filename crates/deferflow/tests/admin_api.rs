mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{defer, setup};
use deferflow::api::{router, ApiState};
use deferflow::InMemoryConnector;

fn app(connector: &InMemoryConnector) -> Router {
    router(ApiState {
        connector: connector.clone(),
    })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_is_ok() {
    let (connector, _clock) = setup();
    let response = app(&connector)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn post_jobs_defers_and_rejects_duplicate_queueing_lock() {
    let (connector, _clock) = setup();
    let body = json!({
        "queue": "emails",
        "task_name": "send",
        "queueing_lock": "user-1",
        "args": {"user_id": 1}
    });

    let (status, created) = post_json(app(&connector), "/jobs", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["job_id"], 1);

    let (status, err) = post_json(app(&connector), "/jobs", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(err["error"].as_str().unwrap().contains("user-1"));

    let (status, _) = post_json(app(&connector), "/jobs", json!({"task_name": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_jobs_filters_by_query_params() {
    let (connector, _clock) = setup();
    defer(&connector, "q1", "send").await;
    defer(&connector, "q2", "send").await;
    connector.fetch_job(None).await.unwrap();

    let (status, jobs) = get_json(app(&connector), "/jobs?queue=q2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["queue_name"], "q2");

    let (_, doing) = get_json(app(&connector), "/jobs?status=doing").await;
    assert_eq!(doing.as_array().unwrap().len(), 1);
    assert_eq!(doing[0]["queue_name"], "q1");

    let (status, _) = get_json(app(&connector), "/jobs?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_and_task_stats() {
    let (connector, _clock) = setup();
    defer(&connector, "q1", "send").await;
    defer(&connector, "q1", "resize").await;

    let (_, queues) = get_json(app(&connector), "/queues").await;
    assert_eq!(
        queues,
        json!([{ "name": "q1", "jobs_count": 2, "stats": { "todo": 2 } }])
    );

    let (_, tasks) = get_json(app(&connector), "/tasks").await;
    assert_eq!(tasks[0]["name"], "resize");
    assert_eq!(tasks[1]["name"], "send");
}

#[tokio::test]
async fn job_events_and_missing_job() {
    let (connector, _clock) = setup();
    let job = defer(&connector, "q1", "send").await;

    let (status, events) = get_json(app(&connector), &format!("/jobs/{}/events", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events[0]["type"], "deferred");

    let (status, err) = get_json(app(&connector), "/jobs/999/events").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "job not found: 999");
}

#[tokio::test]
async fn stalled_endpoint_uses_threshold() {
    let (connector, clock) = setup();
    defer(&connector, "q1", "send").await;
    connector.fetch_job(None).await.unwrap();
    clock.advance(Duration::minutes(10));

    let (_, stalled) = get_json(app(&connector), "/stalled?seconds=60").await;
    assert_eq!(stalled.as_array().unwrap().len(), 1);

    let (_, none) = get_json(app(&connector), "/stalled?seconds=3600").await;
    assert!(none.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn stalled_endpoint_accepts_huge_threshold() {
    let (connector, clock) = setup();
    defer(&connector, "q1", "send").await;
    connector.fetch_job(None).await.unwrap();
    clock.advance(Duration::minutes(10));

    let (status, stalled) = get_json(app(&connector), "/stalled?seconds=9223372036854775807").await;
    assert_eq!(status, StatusCode::OK);
    assert!(stalled.as_array().unwrap().is_empty());
}
