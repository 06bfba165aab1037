// crates/deferflow/src/jobs/store.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError, QUEUEING_LOCK_CONSTRAINT};
use crate::jobs::events::{Event, EventLog, EventType};
use crate::jobs::listing::{group_stats, GroupStats, JobFilter};
use crate::jobs::model::{Job, JobId, JobStatus, NewJob};
use crate::notify::{Channel, Notifications};

/// In-memory job table plus its event log.
///
/// Every method runs to completion without suspending, so callers that wrap the
/// store in a single mutex get atomic "scan + mark doing" and
/// "check queueing lock + insert".
pub struct JobStore {
    clock: Arc<dyn Clock>,

    // BTreeMap keeps creation order, ids are monotonic.
    jobs: BTreeMap<JobId, Job>,
    events: EventLog,
    next_id: JobId,

    // indexes
    todo: BTreeSet<JobId>,
    running_locks: HashMap<String, JobId>,
    queueing_locks: HashMap<String, JobId>,

    notifications: Notifications,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl JobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: BTreeMap::new(),
            events: EventLog::new(),
            next_id: 1,
            todo: BTreeSet::new(),
            running_locks: HashMap::new(),
            queueing_locks: HashMap::new(),
            notifications: Notifications::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Empties the store and restarts identities at 1.
    pub fn reset(&mut self) {
        self.jobs.clear();
        self.events.clear();
        self.next_id = 1;
        self.todo.clear();
        self.running_locks.clear();
        self.queueing_locks.clear();
        self.notifications.clear();
    }

    // ----------------------------
    // Submit
    // ----------------------------

    pub fn defer_job(&mut self, new_job: NewJob) -> Result<Job> {
        if let Some(queueing_lock) = &new_job.queueing_lock {
            if self.queueing_locks.contains_key(queueing_lock) {
                tracing::warn!(
                    queue = %new_job.queue,
                    task = %new_job.task_name,
                    queueing_lock = %queueing_lock,
                    "job rejected, queueing lock already taken"
                );
                return Err(StoreError::UniqueViolation {
                    constraint_name: QUEUEING_LOCK_CONSTRAINT,
                    queueing_lock: queueing_lock.clone(),
                });
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        let job = Job {
            id,
            queue_name: new_job.queue,
            task_name: new_job.task_name,
            lock: new_job.lock,
            queueing_lock: new_job.queueing_lock,
            args: new_job.args,
            status: JobStatus::Todo,
            scheduled_at: new_job.scheduled_at,
            attempts: 0,
        };

        if let Some(at) = job.scheduled_at {
            self.events.append(id, EventType::Scheduled, at);
        }
        self.events.append(id, EventType::Deferred, self.now());

        self.index_todo(&job);
        self.jobs.insert(id, job.clone());

        let woke = self.notifications.job_deferred(&job.queue_name);
        tracing::debug!(
            job_id = id,
            queue = %job.queue_name,
            task = %job.task_name,
            scheduled_at = ?job.scheduled_at,
            woke,
            "job deferred"
        );

        Ok(job)
    }

    // ----------------------------
    // Dispatch
    // ----------------------------

    /// Marks the first eligible job `doing` and returns it. `None` means
    /// nothing is eligible right now, which is not an error.
    pub fn fetch_job(&mut self, queues: Option<&[String]>) -> Option<Job> {
        let now = self.now();

        let id = self.todo.iter().copied().find(|id| {
            self.jobs
                .get(id)
                .is_some_and(|job| self.is_eligible(job, queues, now))
        })?;

        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Doing;
        let job = job.clone();

        self.todo.remove(&id);
        self.release_queueing_lock(&job);
        if let Some(lock) = &job.lock {
            self.running_locks.insert(lock.clone(), id);
        }
        self.events.append(id, EventType::Started, now);

        tracing::debug!(job_id = id, queue = %job.queue_name, task = %job.task_name, "job started");
        Some(job)
    }

    fn is_eligible(&self, job: &Job, queues: Option<&[String]>, now: DateTime<Utc>) -> bool {
        job.status == JobStatus::Todo
            && queues.map_or(true, |qs| qs.iter().any(|q| *q == job.queue_name))
            && job.scheduled_at.map_or(true, |at| at <= now)
            && job
                .lock
                .as_ref()
                .map_or(true, |lock| !self.running_locks.contains_key(lock))
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// Reports the outcome of a `doing` job.
    ///
    /// `status` is `succeeded`, `failed`, or `todo` for a retry. `scheduled_at`
    /// only matters for a retry: it becomes the job's new schedule (unset means
    /// eligible immediately).
    pub fn finish_job(
        &mut self,
        job_id: JobId,
        status: JobStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = self.now();
        let job = self
            .jobs
            .get(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;

        if job.status != JobStatus::Doing || status == JobStatus::Doing {
            return Err(StoreError::InvalidTransition {
                id: job_id,
                from: job.status,
                to: status,
            });
        }

        if status == JobStatus::Todo {
            if let Some(queueing_lock) = &job.queueing_lock {
                if self.queueing_locks.contains_key(queueing_lock) {
                    return Err(StoreError::UniqueViolation {
                        constraint_name: QUEUEING_LOCK_CONSTRAINT,
                        queueing_lock: queueing_lock.clone(),
                    });
                }
            }
        }

        if let Some(lock) = &job.lock {
            self.running_locks.remove(lock);
        }

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return Err(StoreError::JobNotFound(job_id));
        };
        job.status = status;

        let event_type = match status {
            JobStatus::Todo => {
                job.attempts += 1;
                job.scheduled_at = scheduled_at;
                if let Some(at) = scheduled_at {
                    self.events.append(job_id, EventType::Scheduled, at);
                }
                EventType::DeferredForRetry
            }
            JobStatus::Succeeded => EventType::Succeeded,
            JobStatus::Failed => EventType::Failed,
            JobStatus::Doing => unreachable!("rejected above"),
        };
        self.events.append(job_id, event_type, now);

        let job = job.clone();
        if status == JobStatus::Todo {
            self.index_todo(&job);
        }

        tracing::debug!(
            job_id,
            status = %status,
            attempts = job.attempts,
            scheduled_at = ?job.scheduled_at,
            "job finished"
        );
        Ok(())
    }

    fn index_todo(&mut self, job: &Job) {
        self.todo.insert(job.id);
        if let Some(queueing_lock) = &job.queueing_lock {
            self.queueing_locks.insert(queueing_lock.clone(), job.id);
        }
    }

    fn release_queueing_lock(&mut self, job: &Job) {
        if let Some(queueing_lock) = &job.queueing_lock {
            if self.queueing_locks.get(queueing_lock) == Some(&job.id) {
                self.queueing_locks.remove(queueing_lock);
            }
        }
    }

    // ----------------------------
    // Stalled jobs + retention
    // ----------------------------

    /// `doing` jobs whose latest event is older than `nb_seconds`.
    /// Filters set to `None` match anything.
    pub fn stalled_jobs<'a>(
        &'a self,
        nb_seconds: i64,
        queue: Option<&'a str>,
        task_name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Job> + 'a {
        let cutoff = self.cutoff(Duration::try_seconds(nb_seconds));

        self.jobs.values().filter(move |job| {
            job.status == JobStatus::Doing
                && self.is_older_than(job.id, cutoff)
                && queue.map_or(true, |q| q == job.queue_name)
                && task_name.map_or(true, |t| t == job.task_name)
        })
    }

    /// Deletes finished jobs (and their events) whose latest event is older
    /// than `nb_hours`. Returns how many were removed.
    pub fn delete_old_jobs(
        &mut self,
        nb_hours: i64,
        queue: Option<&str>,
        statuses: &[JobStatus],
    ) -> Result<usize> {
        if let Some(status) = statuses.iter().find(|s| !s.is_terminal()) {
            return Err(StoreError::InvalidArgument(format!(
                "retention only deletes finished jobs, got status {status}"
            )));
        }

        let cutoff = self.cutoff(Duration::try_hours(nb_hours));

        let doomed: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| {
                statuses.contains(&job.status)
                    && self.is_older_than(job.id, cutoff)
                    && queue.map_or(true, |q| q == job.queue_name)
            })
            .map(|job| job.id)
            .collect();

        for id in &doomed {
            self.jobs.remove(id);
            self.events.remove(*id);
        }

        if !doomed.is_empty() {
            tracing::info!(
                deleted = doomed.len(),
                nb_hours,
                queue = ?queue,
                "deleted old jobs"
            );
        }
        Ok(doomed.len())
    }

    /// `now - delta`, or `None` when that lands outside the representable
    /// range, in which case nothing is old enough.
    fn cutoff(&self, delta: Option<Duration>) -> Option<DateTime<Utc>> {
        delta.and_then(|delta| self.now().checked_sub_signed(delta))
    }

    fn is_older_than(&self, job_id: JobId, cutoff: Option<DateTime<Utc>>) -> bool {
        match (self.events.latest(job_id), cutoff) {
            (Some(event), Some(cutoff)) => event.at < cutoff,
            _ => false,
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub fn job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn events(&self, job_id: JobId) -> Result<&[Event]> {
        if !self.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(self.events.events_for(job_id))
    }

    /// Locks held by `doing` jobs.
    pub fn current_locks(&self) -> HashSet<&str> {
        self.running_locks.keys().map(String::as_str).collect()
    }

    pub fn finished_jobs(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .collect()
    }

    // ----------------------------
    // Listing
    // ----------------------------

    /// Lazily yields matching jobs in creation order. Each call starts over.
    pub fn list_jobs<'a>(&'a self, filter: &'a JobFilter) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs.values().filter(move |job| filter.matches(job))
    }

    pub fn list_queues(&self, filter: &JobFilter) -> Vec<GroupStats> {
        group_stats(self.list_jobs(filter), |job| job.queue_name.as_str())
    }

    pub fn list_tasks(&self, filter: &JobFilter) -> Vec<GroupStats> {
        group_stats(self.list_jobs(filter), |job| job.task_name.as_str())
    }

    // ----------------------------
    // Notifications
    // ----------------------------

    pub fn listen_notify(&mut self, signal: Arc<Notify>, channels: impl IntoIterator<Item = Channel>) {
        self.notifications.listen(signal, channels);
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }
}
