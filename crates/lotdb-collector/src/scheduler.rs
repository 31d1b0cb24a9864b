//! The scheduler: a single loop that pulls jobs off the queue and runs the
//! collector worker on them, driven by an `Idle → Running → Stopping →
//! Idle` state machine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lotdb_core::{
    AppConfig, Catalog, CollectionJob, ConfigError, CoreError, Priority, ScopeKey,
};
use lotdb_db::{CheckpointStore, DbError, ResetRecord, ResetRequest};
use lotdb_providers::{SaleSink, SaleSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::events::{StatusEvent, EVENT_CHANNEL_CAPACITY};
use crate::queue::{EnqueueOutcome, JobQueue, QueuedJob};
use crate::stop::StopFlag;
use crate::worker::{CollectorWorker, ProviderIssue, WorkerOutcome, WorkerSettings, YieldReason};

/// How long the loop backs off when a job it just dequeued is being reset.
const RESET_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A stop is still draining; try again once idle.
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopping,
    AlreadyStopping,
    NotRunning,
}

/// What an urgent "collect this make now" request does to an idle
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgentStartPolicy {
    /// Only enqueue; the operator starts the scheduler separately.
    #[default]
    EnqueueOnly,
    /// Enqueue and start the scheduler if it is idle.
    AutoStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub idle_poll: Duration,
    pub urgent_start: UrgentStartPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(30),
            urgent_start: UrgentStartPolicy::EnqueueOnly,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            idle_poll: Duration::from_secs(config.idle_poll_secs.max(1)),
            urgent_start: if config.auto_start_on_urgent {
                UrgentStartPolicy::AutoStart
            } else {
                UrgentStartPolicy::EnqueueOnly
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    InvalidJob(#[from] CoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{scope} is being collected right now; stop the scheduler or wait for the job to finish")]
    ScopeBusy { scope: ScopeKey },

    #[error("no checkpoint exists for {scope}")]
    UnknownScope { scope: ScopeKey },

    #[error(transparent)]
    Catalog(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] DbError),
}

/// "Collect this make now."
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MakeRequest {
    pub make: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year_from: Option<u16>,
    #[serde(default)]
    pub year_to: Option<u16>,
}

impl MakeRequest {
    #[must_use]
    pub fn new(make: &str) -> Self {
        Self {
            make: make.to_owned(),
            model: None,
            year_from: None,
            year_to: None,
        }
    }

    /// # Errors
    ///
    /// Returns [`CoreError::InvalidJob`] if the make is blank or the years
    /// are invalid.
    pub fn to_job(&self) -> Result<CollectionJob, CoreError> {
        CollectionJob::with_default_years(
            &self.make,
            self.model.as_deref(),
            self.year_from,
            self.year_to,
            Priority::URGENT,
        )
    }
}

/// "Forget what was collected for this make and start over."
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestartRequest {
    pub make: String,
    #[serde(default)]
    pub model: Option<String>,
    pub reason: String,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrgentEnqueue {
    pub job: CollectionJob,
    pub outcome: EnqueueOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartMakeResult {
    pub jobs: Vec<UrgentEnqueue>,
    /// Set when the urgent-start policy started (or tried to start) the
    /// scheduler.
    pub started: Option<StartOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub enqueued: usize,
    pub already_queued: usize,
    pub skipped_complete: usize,
    pub skipped_attention: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedJob {
    pub job: CollectionJob,
    pub outcome: WorkerOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub phase: Phase,
    pub running: bool,
    pub queue_length: usize,
    pub current_job: Option<CollectionJob>,
    pub last_processed_job: Option<ProcessedJob>,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    current_job: Option<CollectionJob>,
    last_processed: Option<ProcessedJob>,
    resetting: Option<ScopeKey>,
}

struct Inner {
    queue: JobQueue,
    worker: CollectorWorker,
    store: Arc<dyn CheckpointStore>,
    stop: StopFlag,
    state: Mutex<State>,
    issues: Mutex<HashMap<ScopeKey, ProviderIssue>>,
    phase_tx: watch::Sender<Phase>,
    events: broadcast::Sender<StatusEvent>,
    settings: SchedulerSettings,
}

/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("phase", &self.phase())
            .field("queue_length", &self.inner.queue.length())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(
        copart: Arc<dyn SaleSource>,
        iaai: Arc<dyn SaleSource>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn SaleSink>,
        worker_settings: WorkerSettings,
        settings: SchedulerSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let worker = CollectorWorker::new(
            copart,
            iaai,
            Arc::clone(&store),
            sink,
            worker_settings,
            events.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                queue: JobQueue::new(),
                worker,
                store,
                stop: StopFlag::new(),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    current_job: None,
                    last_processed: None,
                    resetting: None,
                }),
                issues: Mutex::new(HashMap::new()),
                phase_tx,
                events,
                settings,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.inner.events.send(event);
    }

    fn set_phase(&self, state: &mut State, phase: Phase) {
        if state.phase == phase {
            return;
        }
        state.phase = phase;
        self.inner.phase_tx.send_replace(phase);
        tracing::info!(?phase, "scheduler phase changed");
        self.emit(StatusEvent::PhaseChanged {
            phase,
            at: Utc::now(),
        });
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    /// Idle → Running, spawning the loop. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut state = self.state();
        match state.phase {
            Phase::Running => StartOutcome::AlreadyRunning,
            Phase::Stopping => StartOutcome::Stopping,
            Phase::Idle => {
                self.inner.stop.clear();
                self.set_phase(&mut state, Phase::Running);
                drop(state);
                let this = self.clone();
                tokio::spawn(async move { this.run_loop().await });
                StartOutcome::Started
            }
        }
    }

    /// Running → Stopping. The worker finishes its current page and the
    /// loop returns to Idle.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.state();
        match state.phase {
            Phase::Idle => StopOutcome::NotRunning,
            Phase::Stopping => StopOutcome::AlreadyStopping,
            Phase::Running => {
                self.set_phase(&mut state, Phase::Stopping);
                self.inner.stop.request();
                StopOutcome::Stopping
            }
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Resolves once the scheduler is Idle.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.phase_tx.subscribe();
        let _ = rx.wait_for(|phase| *phase == Phase::Idle).await;
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase_tx.subscribe()
    }

    async fn run_loop(self) {
        tracing::info!("scheduler loop started");
        loop {
            if self.inner.stop.is_requested() {
                break;
            }
            let Some(queued) = self.inner.queue.dequeue() else {
                tokio::select! {
                    () = self.inner.queue.wait_for_work() => {}
                    () = self.inner.stop.wait() => {}
                    () = tokio::time::sleep(self.inner.settings.idle_poll) => {}
                }
                continue;
            };
            if self.process(queued).await {
                break;
            }
        }

        let mut state = self.state();
        state.current_job = None;
        self.set_phase(&mut state, Phase::Idle);
        tracing::info!("scheduler loop stopped");
    }

    /// Runs one dequeued job and files it according to the outcome. Returns
    /// `true` when the loop should exit.
    async fn process(&self, queued: QueuedJob) -> bool {
        let job = queued.job.clone();
        let scope = job.scope_key();

        let scope_resetting = {
            let mut state = self.state();
            let resetting = state.resetting.as_ref() == Some(&scope);
            if !resetting {
                state.current_job = Some(job.clone());
            }
            resetting
        };
        if scope_resetting {
            self.inner.queue.release(&job.id);
            self.inner.queue.restore(queued);
            return self.inner.stop.sleep(RESET_BACKOFF).await;
        }
        self.emit(StatusEvent::JobStarted {
            job_id: job.id.clone(),
            scope: scope.clone(),
            at: Utc::now(),
        });

        let report = self.inner.worker.run(&job, &self.inner.stop).await;
        let deferred = self.inner.queue.release(&job.id);
        self.record_issue(&scope, report.issue.clone());

        let mut exit = false;
        let mut backoff = false;
        match &report.outcome {
            WorkerOutcome::Completed => {
                if let Some(d) = deferred {
                    self.reinsert(d);
                }
            }
            WorkerOutcome::Yielded(reason) => {
                let next = match deferred {
                    Some(d) if d.priority < job.priority => d,
                    _ => job.clone(),
                };
                self.inner.queue.requeue_tail(next);
                backoff = matches!(
                    reason,
                    YieldReason::ProvidersUnavailable | YieldReason::StoreUnavailable
                );
            }
            WorkerOutcome::Interrupted => {
                self.inner.queue.restore(queued);
                if let Some(d) = deferred {
                    self.reinsert(d);
                }
                exit = true;
            }
            WorkerOutcome::NeedsAttention(reason) => {
                tracing::error!(job_id = %job.id, scope = %scope, reason = %reason, "job needs operator attention");
                if let Err(e) = self.inner.store.mark_attention(&job, reason).await {
                    tracing::error!(scope = %scope, error = %e, "failed to flag scope for attention");
                }
                if let Some(d) = deferred {
                    tracing::warn!(job_id = %d.id, "dropping re-enqueue of a job that needs attention");
                }
            }
        }

        let finished_at = Utc::now();
        {
            let mut state = self.state();
            state.current_job = None;
            if report.outcome == WorkerOutcome::Completed {
                state.last_processed = Some(ProcessedJob {
                    job: job.clone(),
                    outcome: report.outcome.clone(),
                    finished_at,
                });
            }
        }
        self.emit(StatusEvent::JobFinished {
            job_id: job.id,
            outcome: report.outcome,
            at: finished_at,
        });

        if backoff && !exit {
            let cooldown = self.inner.worker.settings().failure_cooldown;
            exit = self.inner.stop.sleep(cooldown).await;
        }
        exit || self.inner.stop.is_requested()
    }

    fn reinsert(&self, job: CollectionJob) {
        let id = job.id.clone();
        let priority = job.priority;
        let outcome = if priority.is_urgent() {
            self.inner.queue.enqueue_urgent(job)
        } else {
            self.inner.queue.enqueue(job)
        };
        self.emit(StatusEvent::JobEnqueued {
            job_id: id,
            priority,
            outcome,
        });
    }

    fn record_issue(&self, scope: &ScopeKey, issue: Option<ProviderIssue>) {
        let mut issues = self
            .inner
            .issues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match issue {
            Some(issue) => {
                issues.insert(scope.clone(), issue);
            }
            None => {
                issues.remove(scope);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Enqueue paths
    // -----------------------------------------------------------------------

    /// Normal-priority enqueue.
    pub fn enqueue(&self, job: CollectionJob) -> EnqueueOutcome {
        let id = job.id.clone();
        let priority = job.priority;
        let outcome = self.inner.queue.enqueue(job);
        self.emit(StatusEvent::JobEnqueued {
            job_id: id,
            priority,
            outcome,
        });
        outcome
    }

    /// Urgent enqueue of one make.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::start_multiple`].
    pub async fn start_make(&self, request: &MakeRequest) -> Result<StartMakeResult, SchedulerError> {
        self.start_multiple(std::slice::from_ref(request)).await
    }

    /// Urgent enqueue of several makes. The first request ends up at the
    /// head of the queue. Clears any attention flag on those scopes.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidRequest`] for an empty list,
    /// [`SchedulerError::InvalidJob`] if any request is invalid (nothing is
    /// enqueued in that case), or [`SchedulerError::Store`] if an attention
    /// flag cannot be cleared.
    pub async fn start_multiple(
        &self,
        requests: &[MakeRequest],
    ) -> Result<StartMakeResult, SchedulerError> {
        if requests.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "at least one search is required".to_owned(),
            ));
        }
        let jobs = requests
            .iter()
            .map(MakeRequest::to_job)
            .collect::<Result<Vec<_>, _>>()?;

        for job in &jobs {
            let scope = job.scope_key();
            self.inner.store.clear_attention(&scope).await?;
            self.record_issue(&scope, None);
        }

        let mut enqueued: Vec<UrgentEnqueue> = jobs
            .into_iter()
            .rev()
            .map(|job| {
                let outcome = self.inner.queue.enqueue_urgent(job.clone());
                tracing::info!(job_id = %job.id, ?outcome, "urgent job enqueued");
                self.emit(StatusEvent::JobEnqueued {
                    job_id: job.id.clone(),
                    priority: job.priority,
                    outcome,
                });
                UrgentEnqueue { job, outcome }
            })
            .collect();
        enqueued.reverse();

        let started = match self.inner.settings.urgent_start {
            UrgentStartPolicy::AutoStart => Some(self.start()),
            UrgentStartPolicy::EnqueueOnly => None,
        };

        Ok(StartMakeResult {
            jobs: enqueued,
            started,
        })
    }

    /// Audited checkpoint reset for one scope, followed by a re-enqueue of
    /// the job that last wrote it.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidRequest`] if reason or requester is blank.
    /// - [`SchedulerError::ScopeBusy`] if the scope is the current job.
    /// - [`SchedulerError::UnknownScope`] if nothing was ever collected for it.
    /// - [`SchedulerError::Store`] on store failure.
    pub async fn restart_make(
        &self,
        request: &RestartRequest,
    ) -> Result<ResetRecord, SchedulerError> {
        if request.make.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("make is required".to_owned()));
        }
        if request.reason.trim().is_empty() || request.requested_by.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "reason and requested_by are required".to_owned(),
            ));
        }
        let scope = ScopeKey::new(request.make.trim(), request.model.as_deref());

        {
            let mut state = self.state();
            let busy = state
                .current_job
                .as_ref()
                .is_some_and(|job| job.scope_key() == scope);
            if busy {
                return Err(SchedulerError::ScopeBusy { scope });
            }
            state.resetting = Some(scope.clone());
        }

        let result = self.reset_scope(&scope, request).await;
        self.state().resetting = None;
        result
    }

    async fn reset_scope(
        &self,
        scope: &ScopeKey,
        request: &RestartRequest,
    ) -> Result<ResetRecord, SchedulerError> {
        let previous_job = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .find(|r| r.scope == *scope)
            .map(|r| r.job);

        let reset = self
            .inner
            .store
            .reset(
                scope,
                &ResetRequest {
                    requested_by: request.requested_by.trim().to_owned(),
                    reason: request.reason.trim().to_owned(),
                },
            )
            .await
            .map_err(|e| match e {
                DbError::NotFound => SchedulerError::UnknownScope {
                    scope: scope.clone(),
                },
                other => SchedulerError::Store(other),
            })?;

        self.record_issue(scope, None);
        self.emit(StatusEvent::CheckpointReset {
            scope: scope.clone(),
            requested_by: reset.requested_by.clone(),
        });

        if let Some(job) = previous_job {
            let job = if job.priority.is_urgent() {
                job.with_priority(Priority::LUXURY)
            } else {
                job
            };
            self.enqueue(job);
        }
        Ok(reset)
    }

    /// Enqueues every catalog entry whose checkpoint is incomplete, then
    /// every other incomplete checkpoint at its recorded priority (urgent
    /// ones demoted to tier 1). Scopes flagged for attention are skipped,
    /// and jobs that are already queued or running are left where they
    /// are. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Catalog`] for an invalid catalog entry or
    /// [`SchedulerError::Store`] if checkpoints cannot be listed.
    pub async fn rebuild_queue(&self, catalog: &Catalog) -> Result<RebuildSummary, SchedulerError> {
        let catalog_jobs = catalog.jobs()?;
        let records = self.inner.store.list().await?;
        let by_scope: HashMap<&ScopeKey, _> = records.iter().map(|r| (&r.scope, r)).collect();

        let mut summary = RebuildSummary::default();
        let mut catalog_scopes = HashSet::new();

        let mut consider = |job: CollectionJob, summary: &mut RebuildSummary| {
            if self.inner.queue.is_known(&job.id) {
                summary.already_queued += 1;
            } else {
                self.enqueue(job);
                summary.enqueued += 1;
            }
        };

        for job in catalog_jobs {
            let scope = job.scope_key();
            match by_scope.get(&scope) {
                Some(r) if r.attention.is_some() => summary.skipped_attention += 1,
                Some(r) if r.checkpoint.is_complete() => summary.skipped_complete += 1,
                _ => consider(job, &mut summary),
            }
            catalog_scopes.insert(scope);
        }

        for record in &records {
            if catalog_scopes.contains(&record.scope) {
                continue;
            }
            if record.attention.is_some() {
                summary.skipped_attention += 1;
            } else if record.checkpoint.is_complete() {
                summary.skipped_complete += 1;
            } else {
                let job = if record.job.priority.is_urgent() {
                    record.job.clone().with_priority(Priority::LUXURY)
                } else {
                    record.job.clone()
                };
                consider(job, &mut summary);
            }
        }

        tracing::info!(
            enqueued = summary.enqueued,
            already_queued = summary.already_queued,
            skipped_complete = summary.skipped_complete,
            skipped_attention = summary.skipped_attention,
            "queue rebuilt from catalog and checkpoints"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let queue_length = self.inner.queue.length();
        let state = self.state();
        SchedulerSnapshot {
            phase: state.phase,
            running: state.phase != Phase::Idle,
            queue_length,
            current_job: state.current_job.clone(),
            last_processed_job: state.last_processed.clone(),
        }
    }

    /// Queued jobs in dequeue order.
    #[must_use]
    pub fn queued_jobs(&self) -> Vec<CollectionJob> {
        self.inner.queue.snapshot()
    }

    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.inner.queue.length()
    }

    #[must_use]
    pub fn issues(&self) -> HashMap<ScopeKey, ProviderIssue> {
        self.inner
            .issues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.inner.store)
    }

    #[must_use]
    pub fn settings(&self) -> SchedulerSettings {
        self.inner.settings
    }
}
