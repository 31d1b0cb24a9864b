//! Status events published on the scheduler's broadcast channel.

use chrono::{DateTime, Utc};
use lotdb_core::{JobId, Priority, Provider, ScopeKey};
use serde::Serialize;

use crate::queue::EnqueueOutcome;
use crate::scheduler::Phase;
use crate::worker::WorkerOutcome;

/// Capacity of the broadcast channel. Slow subscribers that fall further
/// behind than this see a lag error and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    PhaseChanged {
        phase: Phase,
        at: DateTime<Utc>,
    },
    JobEnqueued {
        job_id: JobId,
        priority: Priority,
        outcome: EnqueueOutcome,
    },
    JobStarted {
        job_id: JobId,
        scope: ScopeKey,
        at: DateTime<Utc>,
    },
    PageCollected {
        job_id: JobId,
        provider: Provider,
        page: u32,
        records: u64,
        total_records: u64,
        provider_completed: bool,
    },
    ProviderFailed {
        job_id: JobId,
        provider: Provider,
        page: u32,
        error: String,
    },
    JobFinished {
        job_id: JobId,
        outcome: WorkerOutcome,
        at: DateTime<Utc>,
    },
    CheckpointReset {
        scope: ScopeKey,
        requested_by: String,
    },
}

impl StatusEvent {
    /// The serialized `type` tag, used as the SSE event name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEvent::PhaseChanged { .. } => "phase_changed",
            StatusEvent::JobEnqueued { .. } => "job_enqueued",
            StatusEvent::JobStarted { .. } => "job_started",
            StatusEvent::PageCollected { .. } => "page_collected",
            StatusEvent::ProviderFailed { .. } => "provider_failed",
            StatusEvent::JobFinished { .. } => "job_finished",
            StatusEvent::CheckpointReset { .. } => "checkpoint_reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_serialized_tag() {
        let event = StatusEvent::CheckpointReset {
            scope: ScopeKey::new("BMW", None),
            requested_by: "ops".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["scope"], "bmw:*");
    }
}
