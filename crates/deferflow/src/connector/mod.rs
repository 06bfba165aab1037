//! Query dispatch gateway: the only way into the job store.
//!
//! Callers name an operation and pass named arguments; the gateway resolves the
//! handler (`<operation>_<run|one|all>`), records the call and runs it under the
//! store lock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::jobs::events::Event;
use crate::jobs::listing::{GroupStats, JobFilter};
use crate::jobs::model::{Job, JobId, JobStatus, NewJob};
use crate::jobs::store::JobStore;
use crate::notify::Channel;

pub mod query;

pub use query::{Arguments, Query, ResultShape};

/// One gateway call, as it was made.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub name: String,
    pub arguments: Arguments,
}

struct Inner {
    store: JobStore,
    queries: Vec<RecordedQuery>,
}

/// In-memory store behind the query gateway. Clones share the same store.
#[derive(Clone)]
pub struct InMemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                store: JobStore::new(clock),
                queries: Vec::new(),
            })),
        }
    }

    // ----------------------------
    // Gateway
    // ----------------------------

    async fn generic_execute(
        &self,
        identifier: &str,
        shape: ResultShape,
        arguments: Arguments,
    ) -> Result<Value> {
        let (query, handler) = query::resolve(identifier, shape)?;

        let mut inner = self.inner.lock().await;
        inner.queries.push(RecordedQuery {
            name: query.as_str().to_string(),
            arguments: arguments.clone(),
        });
        tracing::trace!(handler = %query.handler_name(), "dispatching query");

        handler(&mut inner.store, &arguments)
    }

    pub async fn execute_query(&self, identifier: &str, arguments: Arguments) -> Result<()> {
        self.generic_execute(identifier, ResultShape::Run, arguments)
            .await
            .map(|_| ())
    }

    pub async fn execute_query_one(&self, identifier: &str, arguments: Arguments) -> Result<Value> {
        self.generic_execute(identifier, ResultShape::One, arguments).await
    }

    pub async fn execute_query_all(
        &self,
        identifier: &str,
        arguments: Arguments,
    ) -> Result<Vec<Value>> {
        let rows = self
            .generic_execute(identifier, ResultShape::All, arguments)
            .await?;
        Ok(match rows {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    /// Fills `{name}` placeholders of a textual pattern.
    pub fn make_dynamic_query(&self, template: &str, identifiers: &[(&str, &str)]) -> String {
        identifiers
            .iter()
            .fold(template.to_string(), |text, (name, value)| {
                text.replace(&format!("{{{name}}}"), value)
            })
    }

    /// Calls made so far, oldest first.
    pub async fn queries(&self) -> Vec<RecordedQuery> {
        self.inner.lock().await.queries.clone()
    }

    /// Empties the store, the call record and the subscription.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.store.reset();
        inner.queries.clear();
    }

    // ----------------------------
    // Notifications
    // ----------------------------

    /// Registers `signal` to be raised when a job is deferred on one of
    /// `channels`. Replaces the previous registration.
    pub async fn listen_notify(&self, signal: Arc<Notify>, channels: impl IntoIterator<Item = Channel>) {
        self.inner.lock().await.store.listen_notify(signal, channels);
    }

    // ----------------------------
    // Read-side helpers (not recorded)
    // ----------------------------

    pub async fn now(&self) -> DateTime<Utc> {
        self.inner.lock().await.store.now()
    }

    pub async fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.lock().await.store.job(job_id).cloned()
    }

    pub async fn current_locks(&self) -> HashSet<String> {
        let inner = self.inner.lock().await;
        inner
            .store
            .current_locks()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn finished_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner.store.finished_jobs().into_iter().cloned().collect()
    }

    // ----------------------------
    // Typed operations (through the gateway)
    // ----------------------------

    pub async fn defer_job(&self, new_job: NewJob) -> Result<Job> {
        let row = self
            .execute_query_one(Query::DeferJob.as_str(), query::arguments(&new_job)?)
            .await?;
        decode(row)
    }

    /// `None` when no job is eligible.
    pub async fn fetch_job(&self, queues: Option<&[String]>) -> Result<Option<Job>> {
        let row = self
            .execute_query_one(
                Query::FetchJob.as_str(),
                query::arguments(json!({ "queues": queues }))?,
            )
            .await?;
        match row {
            Value::Null => Ok(None),
            row => decode(row).map(Some),
        }
    }

    pub async fn finish_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.execute_query(
            Query::FinishJob.as_str(),
            query::arguments(json!({
                "job_id": job_id,
                "status": status,
                "scheduled_at": scheduled_at,
            }))?,
        )
        .await
    }

    /// Sends a `doing` job back to `todo` (eligible from `retry_at`). When
    /// another `todo` job already holds its queueing lock the job is failed
    /// instead. Returns the status the job ended in.
    pub async fn retry_or_fail(
        &self,
        job_id: JobId,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<JobStatus> {
        match self.finish_job(job_id, JobStatus::Todo, retry_at).await {
            Ok(()) => Ok(JobStatus::Todo),
            Err(e) if e.is_unique_violation() => {
                tracing::warn!(job_id, error = %e, "retry slot taken, failing job");
                self.finish_job(job_id, JobStatus::Failed, None).await?;
                Ok(JobStatus::Failed)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn select_stalled_jobs(
        &self,
        nb_seconds: i64,
        queue: Option<&str>,
        task_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        let rows = self
            .execute_query_all(
                Query::SelectStalledJobs.as_str(),
                query::arguments(json!({
                    "nb_seconds": nb_seconds,
                    "queue": queue,
                    "task_name": task_name,
                }))?,
            )
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn delete_old_jobs(
        &self,
        nb_hours: i64,
        queue: Option<&str>,
        statuses: &[JobStatus],
    ) -> Result<()> {
        self.execute_query(
            Query::DeleteOldJobs.as_str(),
            query::arguments(json!({
                "nb_hours": nb_hours,
                "queue": queue,
                "statuses": statuses,
            }))?,
        )
        .await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let rows = self
            .execute_query_all(Query::ListJobs.as_str(), query::filter_to_arguments(filter))
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn list_queues(&self, filter: &JobFilter) -> Result<Vec<GroupStats>> {
        let rows = self
            .execute_query_all(Query::ListQueues.as_str(), query::filter_to_arguments(filter))
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn list_tasks(&self, filter: &JobFilter) -> Result<Vec<GroupStats>> {
        let rows = self
            .execute_query_all(Query::ListTasks.as_str(), query::filter_to_arguments(filter))
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn job_events(&self, job_id: JobId) -> Result<Vec<Event>> {
        let rows = self
            .execute_query_all(
                Query::ListJobEvents.as_str(),
                query::arguments(json!({ "job_id": job_id }))?,
            )
            .await?;
        rows.into_iter().map(decode).collect()
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}
