use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::jobs::listing::JobFilter;
use crate::jobs::model::{JobId, JobStatus, NewJob};
use crate::jobs::store::JobStore;

/// Named arguments of a gateway call.
pub type Arguments = serde_json::Map<String, Value>;

pub type Handler = fn(&mut JobStore, &Arguments) -> Result<Value>;

/// Every operation the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    DeferJob,
    FetchJob,
    FinishJob,
    SelectStalledJobs,
    DeleteOldJobs,
    ListJobs,
    ListQueues,
    ListTasks,
    ListJobEvents,
}

/// What a handler returns: nothing, one row, or many rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Run,
    One,
    All,
}

impl ResultShape {
    pub fn suffix(&self) -> &'static str {
        match self {
            ResultShape::Run => "run",
            ResultShape::One => "one",
            ResultShape::All => "all",
        }
    }
}

impl Query {
    pub const ALL: [Query; 9] = [
        Query::DeferJob,
        Query::FetchJob,
        Query::FinishJob,
        Query::SelectStalledJobs,
        Query::DeleteOldJobs,
        Query::ListJobs,
        Query::ListQueues,
        Query::ListTasks,
        Query::ListJobEvents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Query::DeferJob => "defer_job",
            Query::FetchJob => "fetch_job",
            Query::FinishJob => "finish_job",
            Query::SelectStalledJobs => "select_stalled_jobs",
            Query::DeleteOldJobs => "delete_old_jobs",
            Query::ListJobs => "list_jobs",
            Query::ListQueues => "list_queues",
            Query::ListTasks => "list_tasks",
            Query::ListJobEvents => "list_job_events",
        }
    }

    pub fn shape(&self) -> ResultShape {
        match self {
            Query::DeferJob | Query::FetchJob => ResultShape::One,
            Query::FinishJob | Query::DeleteOldJobs => ResultShape::Run,
            Query::SelectStalledJobs
            | Query::ListJobs
            | Query::ListQueues
            | Query::ListTasks
            | Query::ListJobEvents => ResultShape::All,
        }
    }

    /// `<operation>_<suffix>`, e.g. `defer_job_one`.
    pub fn handler_name(&self) -> String {
        format!("{}_{}", self.as_str(), self.shape().suffix())
    }

    // Exhaustive on purpose: adding a variant without a handler does not compile.
    fn handler(&self) -> Handler {
        match self {
            Query::DeferJob => defer_job_one,
            Query::FetchJob => fetch_job_one,
            Query::FinishJob => finish_job_run,
            Query::SelectStalledJobs => select_stalled_jobs_all,
            Query::DeleteOldJobs => delete_old_jobs_run,
            Query::ListJobs => list_jobs_all,
            Query::ListQueues => list_queues_all,
            Query::ListTasks => list_tasks_all,
            Query::ListJobEvents => list_job_events_all,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Query {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Query::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| StoreError::UnknownQuery(s.to_string()))
    }
}

/// Maps an identifier plus the expected shape to its handler.
pub fn resolve(identifier: &str, shape: ResultShape) -> Result<(Query, Handler)> {
    let query: Query = identifier.parse()?;
    if query.shape() != shape {
        return Err(StoreError::UnknownHandler {
            query: query.as_str().to_string(),
            suffix: shape.suffix(),
        });
    }
    Ok((query, query.handler()))
}

/// Builds an argument map from any serializable value that encodes as an object.
pub fn arguments(value: impl Serialize) -> Result<Arguments> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Arguments::new()),
        other => Err(StoreError::InvalidArgument(format!(
            "arguments must be an object, got {other}"
        ))),
    }
}

fn parse<T: DeserializeOwned>(query: Query, args: &Arguments) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone())).map_err(|source| {
        StoreError::InvalidArguments {
            query: query.handler_name(),
            source,
        }
    })
}

/// Listing filters arrive as `field: value` pairs; `null` means unconstrained.
pub fn filter_from_arguments(args: &Arguments) -> Result<JobFilter> {
    let mut filter = JobFilter::new();
    for (key, value) in args {
        let expected = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        filter = filter.with(key.parse()?, expected);
    }
    Ok(filter)
}

pub fn filter_to_arguments(filter: &JobFilter) -> Arguments {
    filter
        .constraints()
        .iter()
        .map(|(field, expected)| (field.as_str().to_string(), Value::String(expected.clone())))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchJobArgs {
    pub queues: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinishJobArgs {
    pub job_id: JobId,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectStalledJobsArgs {
    pub nb_seconds: i64,
    pub queue: Option<String>,
    pub task_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteOldJobsArgs {
    pub nb_hours: i64,
    pub queue: Option<String>,
    pub statuses: Vec<JobStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobIdArgs {
    pub job_id: JobId,
}

// ----------------------------
// Handlers
// ----------------------------

fn defer_job_one(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let new_job: NewJob = parse(Query::DeferJob, args)?;
    let job = store.defer_job(new_job)?;
    Ok(serde_json::to_value(job)?)
}

fn fetch_job_one(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let FetchJobArgs { queues } = parse(Query::FetchJob, args)?;
    match store.fetch_job(queues.as_deref()) {
        Some(job) => Ok(serde_json::to_value(job)?),
        None => Ok(Value::Null),
    }
}

fn finish_job_run(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let FinishJobArgs {
        job_id,
        status,
        scheduled_at,
    } = parse(Query::FinishJob, args)?;
    store.finish_job(job_id, status, scheduled_at)?;
    Ok(Value::Null)
}

fn select_stalled_jobs_all(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let SelectStalledJobsArgs {
        nb_seconds,
        queue,
        task_name,
    } = parse(Query::SelectStalledJobs, args)?;
    let rows = store
        .stalled_jobs(nb_seconds, queue.as_deref(), task_name.as_deref())
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn delete_old_jobs_run(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let DeleteOldJobsArgs {
        nb_hours,
        queue,
        statuses,
    } = parse(Query::DeleteOldJobs, args)?;
    store.delete_old_jobs(nb_hours, queue.as_deref(), &statuses)?;
    Ok(Value::Null)
}

fn list_jobs_all(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let filter = filter_from_arguments(args)?;
    let rows = store
        .list_jobs(&filter)
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn list_queues_all(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let filter = filter_from_arguments(args)?;
    Ok(serde_json::to_value(store.list_queues(&filter))?)
}

fn list_tasks_all(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let filter = filter_from_arguments(args)?;
    Ok(serde_json::to_value(store.list_tasks(&filter))?)
}

fn list_job_events_all(store: &mut JobStore, args: &Arguments) -> Result<Value> {
    let JobIdArgs { job_id } = parse(Query::ListJobEvents, args)?;
    Ok(serde_json::to_value(store.events(job_id)?)?)
}
