//! Read-only progress reporting over the scheduler, its queue and the
//! checkpoint store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use lotdb_core::{AppConfig, Checkpoint, CollectionJob, JobId, Provider, ScopeKey};
use lotdb_db::CheckpointRecord;
use serde::Serialize;

use crate::scheduler::{Scheduler, SchedulerError, SchedulerSnapshot};
use crate::worker::ProviderIssue;

/// Cap for an estimated (not yet completed) provider's share of progress.
const INCOMPLETE_CAP: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSettings {
    /// Page count assumed for a provider whose true total is unknown.
    pub estimated_total_pages: u32,
    /// Incomplete scopes with no collection for longer than this are stalled.
    pub stall_threshold: Duration,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            estimated_total_pages: 50,
            stall_threshold: Duration::seconds(60),
        }
    }
}

impl StatusSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            estimated_total_pages: config.estimated_total_pages.max(1),
            stall_threshold: Duration::seconds(
                i64::try_from(config.stall_threshold_secs).unwrap_or(i64::MAX / 1000),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Completed,
    Active,
    Stalled,
    Pending,
    NeedsAttention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Paused,
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProgress {
    pub provider: Provider,
    pub last_page: u32,
    pub completed: bool,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeProgress {
    pub scope: ScopeKey,
    pub make: String,
    pub model: Option<String>,
    pub total_records: u64,
    pub providers: Vec<ProviderProgress>,
    pub percent_complete: f64,
    pub completed: bool,
    pub activity: Activity,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub attention: Option<String>,
    pub issue: Option<ProviderIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job: CollectionJob,
    pub state: JobState,
    /// Zero-based position in dequeue order, when queued.
    pub queue_position: Option<usize>,
    pub progress: ScopeProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MakeProgress {
    pub make: String,
    pub scopes: usize,
    pub total_records: u64,
    pub copart_pages: u32,
    pub iaai_pages: u32,
    pub percent_complete: f64,
    pub completed: bool,
    pub activity: Activity,
    pub last_collected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub scheduler: SchedulerSnapshot,
    pub per_make_progress: Vec<MakeProgress>,
    pub generated_at: DateTime<Utc>,
}

/// Builds status views on demand. Holds no state of its own.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    scheduler: Scheduler,
    settings: StatusSettings,
}

impl StatusReporter {
    #[must_use]
    pub fn new(scheduler: Scheduler, settings: StatusSettings) -> Self {
        Self {
            scheduler,
            settings,
        }
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if checkpoints cannot be listed.
    pub async fn status(&self) -> Result<StatusReport, SchedulerError> {
        let view = self.gather().await?;
        Ok(StatusReport {
            per_make_progress: view.make_progress(),
            scheduler: view.snapshot,
            generated_at: view.now,
        })
    }

    /// Every known job: current, queued and checkpointed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if checkpoints cannot be listed.
    pub async fn jobs(&self) -> Result<Vec<JobStatus>, SchedulerError> {
        Ok(self.gather().await?.jobs())
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if checkpoints cannot be listed.
    pub async fn vehicle_progress(&self) -> Result<Vec<MakeProgress>, SchedulerError> {
        Ok(self.gather().await?.make_progress())
    }

    async fn gather(&self) -> Result<View, SchedulerError> {
        let records = self.scheduler.store().list().await?;
        Ok(View {
            snapshot: self.scheduler.snapshot(),
            queued: self.scheduler.queued_jobs(),
            records,
            issues: self.scheduler.issues(),
            settings: self.settings,
            now: Utc::now(),
        })
    }
}

/// Point-in-time inputs for one status read.
struct View {
    snapshot: SchedulerSnapshot,
    queued: Vec<CollectionJob>,
    records: Vec<CheckpointRecord>,
    issues: HashMap<ScopeKey, ProviderIssue>,
    settings: StatusSettings,
    now: DateTime<Utc>,
}

impl View {
    fn record(&self, scope: &ScopeKey) -> Option<&CheckpointRecord> {
        self.records.iter().find(|r| r.scope == *scope)
    }

    fn is_current_scope(&self, scope: &ScopeKey) -> bool {
        self.snapshot
            .current_job
            .as_ref()
            .is_some_and(|job| job.scope_key() == *scope)
    }

    fn progress(&self, job: &CollectionJob) -> ScopeProgress {
        let scope = job.scope_key();
        let record = self.record(&scope);
        let default_checkpoint = Checkpoint::default();
        let checkpoint = record.map_or(&default_checkpoint, |r| &r.checkpoint);
        let attention = record.and_then(|r| r.attention.clone());
        let issue = self.issues.get(&scope).cloned();

        let providers: Vec<ProviderProgress> = Provider::ALL
            .iter()
            .map(|&provider| ProviderProgress {
                provider,
                last_page: checkpoint.last_page(provider),
                completed: checkpoint.is_provider_completed(provider),
                percent_complete: provider_percent(
                    checkpoint,
                    provider,
                    self.settings.estimated_total_pages,
                ),
            })
            .collect();
        let percent_complete = percent_complete(checkpoint, self.settings.estimated_total_pages);

        let activity = activity(
            checkpoint,
            attention.is_some(),
            self.is_current_scope(&scope),
            issue.as_ref().is_some_and(|i| i.malformed),
            self.now,
            self.settings.stall_threshold,
        );

        ScopeProgress {
            scope,
            make: job.make.clone(),
            model: job.model.clone(),
            total_records: checkpoint.total_records_collected,
            providers,
            percent_complete,
            completed: checkpoint.is_complete(),
            activity,
            last_collected_at: checkpoint.last_collected_at,
            attention,
            issue,
        }
    }

    /// Current job first, then the queue in dequeue order, then every other
    /// checkpointed scope.
    fn known_jobs(&self) -> Vec<CollectionJob> {
        let mut seen: Vec<JobId> = Vec::new();
        let mut jobs = Vec::new();
        let candidates = self
            .snapshot
            .current_job
            .iter()
            .chain(self.queued.iter())
            .chain(self.records.iter().map(|r| &r.job));
        for job in candidates {
            if !seen.contains(&job.id) {
                seen.push(job.id.clone());
                jobs.push(job.clone());
            }
        }
        jobs
    }

    fn jobs(&self) -> Vec<JobStatus> {
        let current_id = self.snapshot.current_job.as_ref().map(|j| &j.id);
        self.known_jobs()
            .into_iter()
            .map(|job| {
                let progress = self.progress(&job);
                let queue_position = self.queued.iter().position(|q| q.id == job.id);
                let state = if current_id == Some(&job.id) {
                    JobState::Running
                } else if progress.attention.is_some() {
                    JobState::NeedsAttention
                } else if queue_position.is_some() {
                    JobState::Queued
                } else if progress.completed {
                    JobState::Completed
                } else {
                    JobState::Paused
                };
                JobStatus {
                    job,
                    state,
                    queue_position,
                    progress,
                }
            })
            .collect()
    }

    fn make_progress(&self) -> Vec<MakeProgress> {
        // One entry per scope, keyed by make slug for stable ordering.
        let mut scopes: BTreeMap<String, Vec<ScopeProgress>> = BTreeMap::new();
        let mut seen_scopes: Vec<ScopeKey> = Vec::new();
        for job in self.known_jobs() {
            let scope = job.scope_key();
            if seen_scopes.contains(&scope) {
                continue;
            }
            let progress = self.progress(&job);
            scopes
                .entry(scope.make_slug().to_owned())
                .or_default()
                .push(progress);
            seen_scopes.push(scope);
        }

        scopes
            .into_values()
            .filter_map(|group| aggregate_make(&group))
            .collect()
    }
}

fn aggregate_make(group: &[ScopeProgress]) -> Option<MakeProgress> {
    let first = group.first()?;
    let pages = |provider: Provider| -> u32 {
        group
            .iter()
            .flat_map(|s| s.providers.iter())
            .filter(|p| p.provider == provider)
            .map(|p| p.last_page)
            .sum()
    };
    let count = u32::try_from(group.len()).unwrap_or(u32::MAX);
    let percent = group.iter().map(|s| s.percent_complete).sum::<f64>() / f64::from(count);
    let completed = group.iter().all(|s| s.completed);
    let has = |a: Activity| group.iter().any(|s| s.activity == a);
    let activity = if has(Activity::NeedsAttention) {
        Activity::NeedsAttention
    } else if completed {
        Activity::Completed
    } else if has(Activity::Active) {
        Activity::Active
    } else if has(Activity::Stalled) {
        Activity::Stalled
    } else {
        Activity::Pending
    };

    Some(MakeProgress {
        make: first.make.clone(),
        scopes: group.len(),
        total_records: group.iter().map(|s| s.total_records).sum(),
        copart_pages: pages(Provider::Copart),
        iaai_pages: pages(Provider::Iaai),
        percent_complete: percent,
        completed,
        activity,
        last_collected_at: group.iter().filter_map(|s| s.last_collected_at).max(),
    })
}

/// Estimated completion for one provider, 0-100. A provider that is not
/// completed never reports more than 99%.
#[must_use]
pub fn provider_percent(checkpoint: &Checkpoint, provider: Provider, estimated_total_pages: u32) -> f64 {
    if checkpoint.is_provider_completed(provider) {
        return 100.0;
    }
    let estimate = f64::from(estimated_total_pages.max(1));
    (f64::from(checkpoint.last_page(provider)) / estimate).min(INCOMPLETE_CAP) * 100.0
}

/// Mean of [`provider_percent`] over both providers.
#[must_use]
pub fn percent_complete(checkpoint: &Checkpoint, estimated_total_pages: u32) -> f64 {
    let sum: f64 = Provider::ALL
        .iter()
        .map(|&p| provider_percent(checkpoint, p, estimated_total_pages))
        .sum();
    sum / 2.0
}

#[must_use]
pub fn activity(
    checkpoint: &Checkpoint,
    needs_attention: bool,
    is_current: bool,
    last_page_malformed: bool,
    now: DateTime<Utc>,
    stall_threshold: Duration,
) -> Activity {
    if needs_attention {
        Activity::NeedsAttention
    } else if checkpoint.is_complete() {
        Activity::Completed
    } else if is_current {
        Activity::Active
    } else if last_page_malformed {
        Activity::Stalled
    } else if checkpoint.last_collected_at.is_none() {
        Activity::Pending
    } else if checkpoint.is_stale(now, stall_threshold) {
        Activity::Stalled
    } else {
        Activity::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(copart: u32, iaai: u32) -> Checkpoint {
        Checkpoint {
            copart_last_page: copart,
            iaai_last_page: iaai,
            ..Checkpoint::default()
        }
    }

    #[test]
    fn completed_provider_counts_as_full() {
        let cp = Checkpoint {
            copart_completed: true,
            copart_last_page: 3,
            iaai_last_page: 10,
            ..Checkpoint::default()
        };
        assert!((provider_percent(&cp, Provider::Copart, 50) - 100.0).abs() < f64::EPSILON);
        assert!((provider_percent(&cp, Provider::Iaai, 50) - 20.0).abs() < 1e-9);
        assert!((percent_complete(&cp, 50) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn incomplete_provider_is_capped_below_full() {
        let cp = checkpoint(500, 0);
        assert!((provider_percent(&cp, Provider::Copart, 50) - 99.0).abs() < 1e-9);
    }

    #[test]
    fn zero_estimate_does_not_divide_by_zero() {
        let cp = checkpoint(1, 0);
        assert!(provider_percent(&cp, Provider::Copart, 0).is_finite());
    }

    #[test]
    fn one_provider_completed_is_not_complete() {
        let cp = Checkpoint {
            copart_completed: true,
            last_collected_at: Some(Utc::now()),
            ..Checkpoint::default()
        };
        let now = Utc::now();
        let act = activity(&cp, false, false, false, now, Duration::seconds(60));
        assert_eq!(act, Activity::Active);
        assert!(percent_complete(&cp, 50) < 100.0);
    }

    #[test]
    fn activity_classification() {
        let now = Utc::now();
        let threshold = Duration::seconds(60);

        let never = Checkpoint::default();
        assert_eq!(activity(&never, false, false, false, now, threshold), Activity::Pending);
        assert_eq!(activity(&never, false, true, false, now, threshold), Activity::Active);
        assert_eq!(
            activity(&never, true, true, false, now, threshold),
            Activity::NeedsAttention
        );

        let old = Checkpoint {
            last_collected_at: Some(now - Duration::minutes(10)),
            ..Checkpoint::default()
        };
        assert_eq!(activity(&old, false, false, false, now, threshold), Activity::Stalled);

        let recent = Checkpoint {
            last_collected_at: Some(now - Duration::seconds(5)),
            ..Checkpoint::default()
        };
        assert_eq!(activity(&recent, false, false, false, now, threshold), Activity::Active);
        assert_eq!(activity(&recent, false, false, true, now, threshold), Activity::Stalled);

        let done = Checkpoint {
            copart_completed: true,
            iaai_completed: true,
            last_collected_at: Some(now - Duration::days(3)),
            ..Checkpoint::default()
        };
        assert_eq!(activity(&done, false, false, false, now, threshold), Activity::Completed);
    }
}
