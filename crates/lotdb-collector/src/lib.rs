//! The collection engine: priority queue, collector worker, scheduler state
//! machine and the read-only status reporter.

pub mod events;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod stop;
pub mod worker;

pub use events::{StatusEvent, EVENT_CHANNEL_CAPACITY};
pub use queue::{EnqueueOutcome, JobQueue, QueuedJob};
pub use scheduler::{
    MakeRequest, Phase, ProcessedJob, RebuildSummary, RestartRequest, Scheduler,
    SchedulerError, SchedulerSettings, SchedulerSnapshot, StartMakeResult, StartOutcome,
    StopOutcome, UrgentEnqueue, UrgentStartPolicy,
};
pub use status::{
    Activity, JobState, JobStatus, MakeProgress, ProviderProgress, ScopeProgress,
    StatusReport, StatusReporter, StatusSettings,
};
pub use stop::StopFlag;
pub use worker::{
    CollectorWorker, ProviderIssue, WorkerOutcome, WorkerReport, WorkerSettings, YieldReason,
};
