use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;

const CHANNEL_PREFIX: &str = "deferflow";

/// A name a worker can listen on to be woken when jobs are deferred.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    AnyQueue,
    Queue(String),
}

impl Channel {
    /// Channels a worker polling `queues` should subscribe to
    /// (`None` means every queue).
    pub fn for_queues(queues: Option<&[String]>) -> Vec<Channel> {
        match queues {
            None => vec![Channel::AnyQueue],
            Some(queues) => queues.iter().map(|q| Channel::Queue(q.clone())).collect(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::AnyQueue => write!(f, "{CHANNEL_PREFIX}_any_queue"),
            Channel::Queue(name) => write!(f, "{CHANNEL_PREFIX}_queue#{name}"),
        }
    }
}

/// Single-subscriber wake signal.
///
/// `Notify::notify_one` keeps at most one permit, so raising twice before the
/// subscriber waits still yields a single wake.
#[derive(Debug, Default)]
pub struct Notifications {
    signal: Option<Arc<Notify>>,
    channels: HashSet<Channel>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous registration.
    pub fn listen(&mut self, signal: Arc<Notify>, channels: impl IntoIterator<Item = Channel>) {
        self.signal = Some(signal);
        self.channels = channels.into_iter().collect();
    }

    pub fn is_listening(&self) -> bool {
        self.signal.is_some()
    }

    /// Raises the signal if the subscriber listens on this queue or on every
    /// queue. Returns whether it was raised.
    pub fn job_deferred(&self, queue: &str) -> bool {
        let Some(signal) = &self.signal else {
            return false;
        };

        let interested = self.channels.contains(&Channel::AnyQueue)
            || self.channels.contains(&Channel::Queue(queue.to_string()));

        if interested {
            signal.notify_one();
        }
        interested
    }

    pub fn clear(&mut self) {
        self.signal = None;
        self.channels.clear();
    }
}
