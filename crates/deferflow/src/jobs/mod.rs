pub mod events;
pub mod listing;
pub mod model;
pub mod retry;
pub mod store;

pub use events::{Event, EventLog, EventType};
pub use listing::{GroupStats, JobField, JobFilter};
pub use model::{Job, JobId, JobStatus, NewJob};
pub use retry::RetryConfig;
pub use store::JobStore;
