use thiserror::Error;

use crate::jobs::model::{JobId, JobStatus};

/// Name of the constraint reported when a queueing lock is already taken.
pub const QUEUEING_LOCK_CONSTRAINT: &str = "deferflow_jobs_queueing_lock_idx";

#[derive(Error, Debug)]
pub enum StoreError {
    /// Another `todo` job already occupies this queueing-lock slot.
    #[error("unique constraint {constraint_name} violated by queueing lock {queueing_lock:?}")]
    UniqueViolation {
        constraint_name: &'static str,
        queueing_lock: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("unknown query: {0}")]
    UnknownQuery(String),

    #[error("query {query} has no `{suffix}` handler")]
    UnknownHandler { query: String, suffix: &'static str },

    #[error("invalid arguments for {query}: {source}")]
    InvalidArguments {
        query: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown job field: {0}")]
    UnknownField(String),

    #[error("row encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    /// Errors that mean the caller broke the store contract (or the gateway is
    /// misconfigured) rather than hit an expected condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::JobNotFound(_)
                | StoreError::UnknownQuery(_)
                | StoreError::UnknownHandler { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
