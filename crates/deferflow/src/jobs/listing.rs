use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::jobs::model::{Job, JobStatus};

/// Job fields that listing filters can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobField {
    Id,
    QueueName,
    TaskName,
    Lock,
    QueueingLock,
    Status,
    Attempts,
}

impl JobField {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobField::Id => "id",
            JobField::QueueName => "queue_name",
            JobField::TaskName => "task_name",
            JobField::Lock => "lock",
            JobField::QueueingLock => "queueing_lock",
            JobField::Status => "status",
            JobField::Attempts => "attempts",
        }
    }

    /// Field value rendered as text; `None` when the optional field is unset.
    fn value_of(&self, job: &Job) -> Option<String> {
        match self {
            JobField::Id => Some(job.id.to_string()),
            JobField::QueueName => Some(job.queue_name.clone()),
            JobField::TaskName => Some(job.task_name.clone()),
            JobField::Lock => job.lock.clone(),
            JobField::QueueingLock => job.queueing_lock.clone(),
            JobField::Status => Some(job.status.as_str().to_string()),
            JobField::Attempts => Some(job.attempts.to_string()),
        }
    }
}

impl FromStr for JobField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(JobField::Id),
            "queue_name" | "queue" => Ok(JobField::QueueName),
            "task_name" | "task" => Ok(JobField::TaskName),
            "lock" => Ok(JobField::Lock),
            "queueing_lock" => Ok(JobField::QueueingLock),
            "status" => Ok(JobField::Status),
            "attempts" => Ok(JobField::Attempts),
            other => Err(StoreError::UnknownField(other.to_string())),
        }
    }
}

/// Conjunction of `field == value` constraints, compared as strings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    constraints: Vec<(JobField, String)>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: JobField, expected: impl ToString) -> Self {
        self.constraints.push((field, expected.to_string()));
        self
    }

    /// Adds the constraint only when `expected` is set.
    pub fn with_opt(self, field: JobField, expected: Option<impl ToString>) -> Self {
        match expected {
            Some(expected) => self.with(field, expected),
            None => self,
        }
    }

    pub fn constraints(&self) -> &[(JobField, String)] {
        &self.constraints
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.constraints
            .iter()
            .all(|(field, expected)| field.value_of(job).as_deref() == Some(expected.as_str()))
    }
}

/// Per-queue or per-task aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub name: String,
    pub jobs_count: usize,
    pub stats: BTreeMap<JobStatus, usize>,
}

/// Groups jobs by `key`, ordered by group name.
pub fn group_stats<'a, I, F>(jobs: I, key: F) -> Vec<GroupStats>
where
    I: IntoIterator<Item = &'a Job>,
    F: Fn(&Job) -> &str,
{
    let mut groups: BTreeMap<String, GroupStats> = BTreeMap::new();

    for job in jobs {
        let name = key(job);
        let group = groups
            .entry(name.to_string())
            .or_insert_with(|| GroupStats {
                name: name.to_string(),
                jobs_count: 0,
                stats: BTreeMap::new(),
            });
        group.jobs_count += 1;
        *group.stats.entry(job.status).or_insert(0) += 1;
    }

    groups.into_values().collect()
}
