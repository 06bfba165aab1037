use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub type JobId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub task_name: String,

    pub lock: Option<String>,
    pub queueing_lock: Option<String>,

    pub args: Value,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

/// What a producer hands to `defer_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub task_name: String,
    pub lock: Option<String>,
    pub queueing_lock: Option<String>,
    pub args: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub queue: String,
}

impl NewJob {
    pub fn new(queue: &str, task_name: &str, args: Value) -> Self {
        Self {
            task_name: task_name.to_string(),
            lock: None,
            queueing_lock: None,
            args,
            scheduled_at: None,
            queue: queue.to_string(),
        }
    }

    pub fn lock(mut self, lock: &str) -> Self {
        self.lock = Some(lock.to_string());
        self
    }

    pub fn queueing_lock(mut self, queueing_lock: &str) -> Self {
        self.queueing_lock = Some(queueing_lock.to_string());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Todo,
    Doing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Todo => "todo",
            JobStatus::Doing => "doing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(JobStatus::Todo),
            "doing" => Ok(JobStatus::Doing),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}
