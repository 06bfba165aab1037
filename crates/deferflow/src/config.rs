// Config is a central place for runtime configuration.
// It loads values from environment variables (and `.env`) into a typed struct.

#[derive(Clone, Debug)]
pub struct Config {
    pub worker_id: String,
    /// `None` means every queue.
    pub queues: Option<Vec<String>>,
    pub poll_interval_ms: u64,
    pub stalled_after_secs: i64,
    pub retention_hours: i64,
    pub maintenance_interval_secs: u64,
    pub admin_addr: Option<String>,
    /// Demo jobs the worker defers at startup.
    pub seed_jobs: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading keys through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |primary: &str, fallback: &str| env_or_fallback(&lookup, primary, fallback);

        let worker_id = var("DEFERFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| lookup("HOSTNAME"))
            .unwrap_or_else(|| "worker-1".to_string());

        let queues = var("DEFERFLOW_QUEUES", "QUEUES").and_then(|s| parse_queues(&s));

        let poll_interval_ms = parse_or(var("DEFERFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS"), 250)?;
        let stalled_after_secs =
            parse_or(var("DEFERFLOW_STALLED_AFTER_SECS", "STALLED_AFTER_SECS"), 30 * 60)?;
        let retention_hours = parse_or(var("DEFERFLOW_RETENTION_HOURS", "RETENTION_HOURS"), 24 * 7)?;
        let maintenance_interval_secs = parse_or(
            var("DEFERFLOW_MAINTENANCE_INTERVAL_SECS", "MAINTENANCE_INTERVAL_SECS"),
            60,
        )?;

        if stalled_after_secs <= 0 {
            anyhow::bail!("STALLED_AFTER_SECS must be > 0, got {stalled_after_secs}");
        }
        if retention_hours < 0 {
            anyhow::bail!("RETENTION_HOURS must be >= 0, got {retention_hours}");
        }

        let admin_addr =
            var("DEFERFLOW_ADMIN_ADDR", "ADMIN_ADDR").and_then(|s| normalize_optional_addr(&s));

        let seed_jobs = parse_or(var("DEFERFLOW_SEED_JOBS", "SEED_JOBS"), 0)?;

        Ok(Self {
            worker_id,
            queues,
            poll_interval_ms,
            stalled_after_secs,
            retention_hours,
            maintenance_interval_secs,
            admin_addr,
            seed_jobs,
        })
    }
}

fn env_or_fallback(
    lookup: &impl Fn(&str) -> Option<String>,
    primary: &str,
    fallback: &str,
) -> Option<String> {
    lookup(primary)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| lookup(fallback).filter(|s| !s.trim().is_empty()))
}

fn parse_or<T>(value: Option<String>, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value {raw:?}: {e}")),
        None => Ok(default),
    }
}

fn parse_queues(value: &str) -> Option<Vec<String>> {
    let queues: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();
    if queues.is_empty() {
        None
    } else {
        Some(queues)
    }
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
