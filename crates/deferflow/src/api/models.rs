// crates/deferflow/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::model::JobId;

#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    pub queue: Option<String>,
    pub task: Option<String>,
    pub status: Option<String>,
    pub lock: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StalledQuery {
    pub seconds: Option<i64>,
    pub queue: Option<String>,
    pub task: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeferRequest {
    pub queue: Option<String>,
    pub task_name: String,
    pub lock: Option<String>,
    pub queueing_lock: Option<String>,
    #[serde(default)]
    pub args: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
