use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::model::{JobId, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Scheduled,
    Deferred,
    Started,
    Succeeded,
    Failed,
    DeferredForRetry,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Scheduled => "scheduled",
            EventType::Deferred => "deferred",
            EventType::Started => "started",
            EventType::Succeeded => "succeeded",
            EventType::Failed => "failed",
            EventType::DeferredForRetry => "deferred_for_retry",
        }
    }

    /// The status a job must have when this is its latest event.
    pub fn implied_status(&self) -> JobStatus {
        match self {
            EventType::Scheduled | EventType::Deferred | EventType::DeferredForRetry => {
                JobStatus::Todo
            }
            EventType::Started => JobStatus::Doing,
            EventType::Succeeded => JobStatus::Succeeded,
            EventType::Failed => JobStatus::Failed,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub at: DateTime<Utc>,
}

/// Append-only timeline of events, one per job.
#[derive(Debug, Default)]
pub struct EventLog {
    events: HashMap<JobId, Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, job_id: JobId, event_type: EventType, at: DateTime<Utc>) {
        self.events
            .entry(job_id)
            .or_default()
            .push(Event { event_type, at });
    }

    pub fn events_for(&self, job_id: JobId) -> &[Event] {
        self.events.get(&job_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Last appended event. Timestamps are not compared: a `scheduled` event
    /// may carry a future instant and still not be the most recent one.
    pub fn latest(&self, job_id: JobId) -> Option<&Event> {
        self.events.get(&job_id).and_then(|events| events.last())
    }

    /// Drops the whole timeline of a job. Only retention calls this.
    pub fn remove(&mut self, job_id: JobId) -> Vec<Event> {
        self.events.remove(&job_id).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

