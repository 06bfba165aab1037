use deferflow::api;
use deferflow::config::Config;
use deferflow::jobs::retry::{classify_error, ErrorClass, RetryConfig};
use deferflow::jobs::{Job, JobStatus, NewJob};
use deferflow::notify::Channel;
use deferflow::InMemoryConnector;

use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod handlers;
use handlers::{build_registry, TaskContext, TaskError, TaskRegistry};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cfg = Config::from_env()?;

    let registry = build_registry();
    let mut tasks: Vec<&str> = registry.task_names().collect();
    tasks.sort_unstable();

    tracing::info!(
        worker_id = %cfg.worker_id,
        queues = ?cfg.queues,
        poll_interval_ms = cfg.poll_interval_ms,
        stalled_after_secs = cfg.stalled_after_secs,
        retention_hours = cfg.retention_hours,
        maintenance_interval_secs = cfg.maintenance_interval_secs,
        admin = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        tasks = ?tasks,
        "deferflow worker starting"
    );

    let connector = InMemoryConnector::new();
    seed(&connector, cfg.seed_jobs).await?;

    // ---- Admin API task ----
    let app = api::router(api::ApiState {
        connector: connector.clone(),
    });
    let api_addr = cfg.admin_addr.clone();
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "admin api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Maintenance task (stalled jobs + retention) ----
    let maintenance_handle = {
        let connector = connector.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            loop {
                reap_stalled(&connector, cfg.stalled_after_secs).await?;

                connector
                    .delete_old_jobs(
                        cfg.retention_hours,
                        None,
                        &[JobStatus::Succeeded, JobStatus::Failed],
                    )
                    .await?;

                tokio::time::sleep(Duration::from_secs(cfg.maintenance_interval_secs)).await;
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Worker loop task ----
    let worker_handle = {
        let connector = connector.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move { run_worker(connector, registry, cfg).await })
    };

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res??,
        res = maintenance_handle => res??,
        _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
    }

    Ok(())
}

async fn seed(connector: &InMemoryConnector, n: usize) -> anyhow::Result<()> {
    for i in 0..n {
        let new_job = match i % 3 {
            0 => NewJob::new("default", "sum", json!({ "a": i, "b": 1 })),
            1 => NewJob::new("default", "sleep", json!({ "millis": 200 })).lock("sleepers"),
            _ => NewJob::new("default", "flaky", json!({})),
        };
        let job = connector.defer_job(new_job).await?;
        tracing::info!(job_id = job.id, task = %job.task_name, "seeded job");
    }
    Ok(())
}

/// Sends jobs whose worker went quiet back to `todo`.
async fn reap_stalled(connector: &InMemoryConnector, stalled_after_secs: i64) -> anyhow::Result<()> {
    let stalled = connector
        .select_stalled_jobs(stalled_after_secs, None, None)
        .await?;

    for job in stalled {
        tracing::warn!(
            job_id = job.id,
            queue = %job.queue_name,
            task = %job.task_name,
            "retrying stalled job"
        );
        // another todo job may already hold its queueing lock
        connector.retry_or_fail(job.id, None).await?;
    }
    Ok(())
}

async fn run_worker(
    connector: InMemoryConnector,
    registry: Arc<TaskRegistry>,
    cfg: Config,
) -> anyhow::Result<()> {
    let signal = Arc::new(Notify::new());
    connector
        .listen_notify(signal.clone(), Channel::for_queues(cfg.queues.as_deref()))
        .await;

    let ctx = TaskContext {
        worker_id: cfg.worker_id.clone(),
    };
    let retry_cfg = RetryConfig::default();
    let mut rng = StdRng::from_entropy();
    let poll_interval = Duration::from_millis(cfg.poll_interval_ms);

    loop {
        let Some(job) = connector.fetch_job(cfg.queues.as_deref()).await? else {
            tokio::select! {
                _ = signal.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        };

        tracing::info!(
            job_id = job.id,
            task = %job.task_name,
            attempts = job.attempts,
            "running job"
        );

        let result = match registry.task_for(&job.task_name) {
            Some(entry) => entry.run(&job, &ctx).await,
            None => Err(TaskError::new(
                "UNKNOWN_TASK",
                format!("no task registered as {}", job.task_name),
            )),
        };

        match result {
            Ok(()) => {
                connector
                    .finish_job(job.id, JobStatus::Succeeded, None)
                    .await?;
                tracing::info!(job_id = job.id, "job succeeded");
            }
            Err(err) => {
                on_failure(&connector, &job, err, &retry_cfg, &mut rng).await?;
            }
        }
    }
}

async fn on_failure(
    connector: &InMemoryConnector,
    job: &Job,
    err: TaskError,
    retry_cfg: &RetryConfig,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let retry_at = match classify_error(err.code) {
        ErrorClass::Retryable => retry_cfg.retry_at(connector.now().await, job.attempts, rng),
        ErrorClass::NonRetryable => None,
    };

    let Some(at) = retry_at else {
        connector
            .finish_job(job.id, JobStatus::Failed, None)
            .await?;
        tracing::error!(
            job_id = job.id,
            code = err.code,
            error = %err.message,
            "job failed"
        );
        return Ok(());
    };

    match connector.retry_or_fail(job.id, Some(at)).await? {
        JobStatus::Todo => tracing::warn!(
            job_id = job.id,
            code = err.code,
            error = %err.message,
            retry_at = %at,
            "job failed, retry scheduled"
        ),
        _ => tracing::error!(
            job_id = job.id,
            code = err.code,
            error = %err.message,
            "job failed, retry slot taken by a newer job"
        ),
    }
    Ok(())
}
