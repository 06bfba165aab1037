pub mod api;
pub mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod jobs;
pub mod notify;

pub use connector::InMemoryConnector;
pub use error::{Result, StoreError};
