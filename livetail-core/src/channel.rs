//! Broker channel naming
//!
//! - `thread:{thread_id}` direct per-thread channel
//! - `agent_run:{run_id}:new_response` legacy per-run channel

use crate::models::{RunId, ThreadId};

#[must_use]
pub fn thread_channel(thread_id: &ThreadId) -> String {
    format!("thread:{}", thread_id.as_str())
}

#[must_use]
pub fn legacy_run_channel(run_id: &RunId) -> String {
    format!("agent_run:{}:new_response", run_id.as_str())
}

/// The channels one relay session subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    direct: String,
    legacy: Option<String>,
}

impl ChannelSet {
    /// The legacy channel is only added for a non-empty run id that differs
    /// from the thread id.
    #[must_use]
    pub fn for_thread(thread_id: &ThreadId, run_id: Option<&RunId>) -> Self {
        let legacy = run_id
            .filter(|run| !run.is_empty() && run.as_str() != thread_id.as_str())
            .map(legacy_run_channel);

        Self {
            direct: thread_channel(thread_id),
            legacy,
        }
    }

    #[must_use]
    pub fn direct(&self) -> &str {
        &self.direct
    }

    #[must_use]
    pub fn legacy(&self) -> Option<&str> {
        self.legacy.as_deref()
    }

    /// All channel names, direct first
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        std::iter::once(self.direct.clone())
            .chain(self.legacy.clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.direct == channel || self.legacy.as_deref() == Some(channel)
    }
}
