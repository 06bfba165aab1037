use deferflow::jobs::Job;
use serde::Deserialize;
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use tokio::time::timeout;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn = dyn for<'a> Fn(&'a Job, &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>
    + Send
    + Sync;

#[derive(Debug)]
pub struct TaskError {
    pub code: &'static str,
    pub message: String,
}

impl TaskError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct TaskContext {
    pub worker_id: String,
}

#[derive(Clone)]
pub struct TaskEntry {
    handler: Arc<HandlerFn>,
    timeout: Option<Duration>,
}

impl TaskEntry {
    pub async fn run(&self, job: &Job, ctx: &TaskContext) -> Result<(), TaskError> {
        let fut = (self.handler)(job, ctx);
        match self.timeout {
            Some(dur) => timeout(dur, fut).await.unwrap_or_else(|_| {
                Err(TaskError::new(
                    "TIMEOUT",
                    format!("task timeout after {}ms", dur.as_millis()),
                ))
            }),
            None => fut.await,
        }
    }
}

/// Task name -> code to run.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_name: &str, handler: F, timeout: Option<Duration>)
    where
        F: for<'a> Fn(&'a Job, &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>
            + Send
            + Sync
            + 'static,
    {
        self.tasks.insert(
            task_name.to_string(),
            TaskEntry {
                handler: Arc::new(handler),
                timeout,
            },
        );
    }

    pub fn task_for(&self, task_name: &str) -> Option<&TaskEntry> {
        self.tasks.get(task_name)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

#[derive(Deserialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

fn parse_args<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, TaskError> {
    serde_json::from_value(job.args.clone()).map_err(|e| TaskError::new("BAD_ARGS", e.to_string()))
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

pub fn build_registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();

    registry.register(
        "sum",
        |job, ctx| {
            boxed(async move {
                let args: SumArgs = parse_args(job)?;
                let result = args.a.checked_add(args.b).ok_or_else(|| {
                    TaskError::new("BAD_ARGS", format!("{} + {} overflows", args.a, args.b))
                })?;
                tracing::info!(
                    job_id = job.id,
                    worker_id = %ctx.worker_id,
                    result,
                    "sum computed"
                );
                Ok(())
            })
        },
        Some(Duration::from_secs(5)),
    );

    registry.register(
        "sleep",
        |job, _ctx| {
            boxed(async move {
                let millis = job.args.get("millis").and_then(|v| v.as_u64()).unwrap_or(300);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(())
            })
        },
        Some(Duration::from_secs(10)),
    );

    registry.register(
        "flaky",
        |_job, _ctx| {
            boxed(async move {
                if rand::random::<f64>() < 0.5 {
                    Err(TaskError::new("DEPENDENCY_DOWN", "simulated outage"))
                } else {
                    Ok(())
                }
            })
        },
        Some(Duration::from_secs(5)),
    );

    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferflow::jobs::JobStatus;
    use serde_json::{json, Value};

    fn job(task_name: &str, args: Value) -> Job {
        Job {
            id: 1,
            queue_name: "default".to_string(),
            task_name: task_name.to_string(),
            lock: None,
            queueing_lock: None,
            args,
            status: JobStatus::Doing,
            scheduled_at: None,
            attempts: 0,
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            worker_id: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn sum_runs() {
        let registry = build_registry();
        let entry = registry.task_for("sum").unwrap();
        assert!(entry.run(&job("sum", json!({"a": 2, "b": 3})), &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn sum_overflow_is_bad_args() {
        let registry = build_registry();
        let entry = registry.task_for("sum").unwrap();

        let err = entry
            .run(&job("sum", json!({"a": i64::MAX, "b": 1})), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, "BAD_ARGS");
    }

    #[tokio::test]
    async fn sum_with_missing_args_is_bad_args() {
        let registry = build_registry();
        let entry = registry.task_for("sum").unwrap();

        let err = entry.run(&job("sum", json!({})), &ctx()).await.unwrap_err();
        assert_eq!(err.code, "BAD_ARGS");
    }
}
