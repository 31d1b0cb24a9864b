//! Collects one job: walks both providers' pages from the stored cursor,
//! hands records to the sink, and saves the checkpoint after every page.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lotdb_core::{AppConfig, Checkpoint, CollectionJob, Provider};
use lotdb_db::{CheckpointStore, DbError};
use lotdb_providers::{ProviderError, SaleQuery, SaleSink, SaleSource};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::StatusEvent;
use crate::stop::StopFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldReason {
    /// The per-run page budget was used up.
    PageBudget,
    /// Every provider with work left was benched for repeated failures.
    ProvidersUnavailable,
    /// The checkpoint store had a connection-level failure.
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed,
    Interrupted,
    Yielded(YieldReason),
    NeedsAttention(String),
}

/// The most recent provider problem seen for a scope that was not followed
/// by a successful page from the same provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderIssue {
    pub provider: Provider,
    pub page: u32,
    pub message: String,
    pub malformed: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub outcome: WorkerOutcome,
    /// Fetch attempts made, successful or not.
    pub attempts: u32,
    pub pages_collected: u32,
    pub records_collected: u64,
    pub checkpoint: Checkpoint,
    pub issue: Option<ProviderIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub page_budget: u32,
    pub max_consecutive_failures: u32,
    pub failure_cooldown: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            page_budget: 25,
            max_consecutive_failures: 3,
            failure_cooldown: Duration::from_secs(5),
        }
    }
}

impl WorkerSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            page_budget: config.page_budget.max(1),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            failure_cooldown: Duration::from_millis(config.failure_cooldown_ms),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ProviderRun {
    consecutive_failures: u32,
    benched: bool,
}

pub struct CollectorWorker {
    copart: Arc<dyn SaleSource>,
    iaai: Arc<dyn SaleSource>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn SaleSink>,
    settings: WorkerSettings,
    events: broadcast::Sender<StatusEvent>,
}

impl std::fmt::Debug for CollectorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorWorker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum Step {
    Continue,
    Finish(WorkerOutcome),
}

impl CollectorWorker {
    #[must_use]
    pub fn new(
        copart: Arc<dyn SaleSource>,
        iaai: Arc<dyn SaleSource>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn SaleSink>,
        settings: WorkerSettings,
        events: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            copart,
            iaai,
            store,
            sink,
            settings,
            events,
        }
    }

    #[must_use]
    pub fn settings(&self) -> WorkerSettings {
        self.settings
    }

    fn source(&self, provider: Provider) -> &dyn SaleSource {
        match provider {
            Provider::Copart => self.copart.as_ref(),
            Provider::Iaai => self.iaai.as_ref(),
        }
    }

    fn emit(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Runs `job` until it completes, yields, is interrupted, or needs an
    /// operator. The stop flag is checked before every fetch, never during
    /// one.
    pub async fn run(&self, job: &CollectionJob, stop: &StopFlag) -> WorkerReport {
        let scope = job.scope_key();
        let mut report = WorkerReport {
            outcome: WorkerOutcome::Completed,
            attempts: 0,
            pages_collected: 0,
            records_collected: 0,
            checkpoint: Checkpoint::default(),
            issue: None,
        };

        match self.store.load_record(&scope).await {
            Ok(Some(record)) if !record.checkpoint.is_fresh() && !record.job.same_years(job) => {
                // One cursor per scope: pages of another year range do not line up.
                let reason = format!(
                    "checkpoint for {scope} belongs to {}; reset the scope before collecting {}-{}",
                    record.job.id, job.year_from, job.year_to
                );
                tracing::warn!(job_id = %job.id, scope = %scope, owner = %record.job.id, "checkpoint written for another year range");
                report.checkpoint = record.checkpoint;
                report.outcome = WorkerOutcome::NeedsAttention(reason);
                return report;
            }
            Ok(record) => report.checkpoint = record.map(|r| r.checkpoint).unwrap_or_default(),
            Err(e) => {
                report.outcome = store_failure_outcome(&e);
                tracing::error!(job_id = %job.id, scope = %scope, error = %e, "checkpoint load failed");
                return report;
            }
        }

        tracing::info!(
            job_id = %job.id,
            scope = %scope,
            copart_next = report.checkpoint.next_page(Provider::Copart),
            iaai_next = report.checkpoint.next_page(Provider::Iaai),
            "collector worker started"
        );

        let query = SaleQuery::from_job(job);
        let mut runs = [ProviderRun::default(); 2];

        let outcome = 'run: loop {
            if report.checkpoint.is_complete() {
                break WorkerOutcome::Completed;
            }

            let mut any_success = false;
            let mut any_attempt = false;

            for provider in Provider::ALL {
                let idx = provider_index(provider);
                if report.checkpoint.is_provider_completed(provider) || runs[idx].benched {
                    continue;
                }
                if stop.is_requested() {
                    break 'run WorkerOutcome::Interrupted;
                }
                if report.attempts >= self.settings.page_budget {
                    break 'run WorkerOutcome::Yielded(YieldReason::PageBudget);
                }

                any_attempt = true;
                report.attempts += 1;
                match self
                    .collect_page(job, &query, provider, &mut report)
                    .await
                {
                    Ok(Step::Continue) => {
                        any_success = true;
                        runs[idx].consecutive_failures = 0;
                        if report.issue.as_ref().is_some_and(|i| i.provider == provider) {
                            report.issue = None;
                        }
                    }
                    Ok(Step::Finish(outcome)) => break 'run outcome,
                    Err(issue) => {
                        runs[idx].consecutive_failures += 1;
                        if runs[idx].consecutive_failures >= self.settings.max_consecutive_failures {
                            runs[idx].benched = true;
                            tracing::warn!(
                                job_id = %job.id,
                                %provider,
                                failures = runs[idx].consecutive_failures,
                                "provider benched for the rest of this run"
                            );
                        }
                        report.issue = Some(issue);
                    }
                }
            }

            if report.checkpoint.is_complete() {
                break WorkerOutcome::Completed;
            }

            let all_benched = report
                .checkpoint
                .pending_providers()
                .into_iter()
                .all(|p| runs[provider_index(p)].benched);
            if all_benched {
                break WorkerOutcome::Yielded(YieldReason::ProvidersUnavailable);
            }

            if any_attempt && !any_success && stop.sleep(self.settings.failure_cooldown).await {
                break WorkerOutcome::Interrupted;
            }
        };

        tracing::info!(
            job_id = %job.id,
            outcome = ?outcome,
            pages = report.pages_collected,
            records = report.records_collected,
            total_records = report.checkpoint.total_records_collected,
            "collector worker finished"
        );
        report.outcome = outcome;
        report
    }

    /// Fetches and applies one page. `Err` is a provider-side failure that
    /// counts against the provider; store trouble ends the run via
    /// `Step::Finish`.
    async fn collect_page(
        &self,
        job: &CollectionJob,
        query: &SaleQuery,
        provider: Provider,
        report: &mut WorkerReport,
    ) -> Result<Step, ProviderIssue> {
        let page_no = report.checkpoint.next_page(provider);
        let page = match self.source(provider).fetch_page(query, page_no).await {
            Ok(page) => page,
            Err(e) => return Err(self.provider_failure(job, provider, page_no, &e)),
        };

        let count = page.record_count();
        if let Err(e) = self.sink.store(job, provider, &page.records).await {
            tracing::warn!(job_id = %job.id, %provider, page = page_no, error = %e, "sale sink failed");
            self.emit(StatusEvent::ProviderFailed {
                job_id: job.id.clone(),
                provider,
                page: page_no,
                error: e.to_string(),
            });
            return Err(ProviderIssue {
                provider,
                page: page_no,
                message: e.to_string(),
                malformed: false,
                at: Utc::now(),
            });
        }

        let mut next = report.checkpoint.clone();
        if let Err(e) = next.record_page(provider, page.next_page, count, page.has_more, Utc::now()) {
            tracing::error!(job_id = %job.id, %provider, page = page_no, error = %e, "page does not follow checkpoint");
            return Ok(Step::Finish(WorkerOutcome::NeedsAttention(e.to_string())));
        }

        if let Err(e) = self.store.save(job, &next).await {
            tracing::error!(job_id = %job.id, %provider, page = page_no, error = %e, "checkpoint save failed");
            return Ok(Step::Finish(store_failure_outcome(&e)));
        }

        report.checkpoint = next;
        report.pages_collected += 1;
        report.records_collected += count;

        tracing::debug!(
            job_id = %job.id,
            %provider,
            page = page_no,
            records = count,
            has_more = page.has_more,
            "page collected"
        );
        self.emit(StatusEvent::PageCollected {
            job_id: job.id.clone(),
            provider,
            page: page_no,
            records: count,
            total_records: report.checkpoint.total_records_collected,
            provider_completed: report.checkpoint.is_provider_completed(provider),
        });
        Ok(Step::Continue)
    }

    fn provider_failure(
        &self,
        job: &CollectionJob,
        provider: Provider,
        page: u32,
        err: &ProviderError,
    ) -> ProviderIssue {
        if err.is_malformed() {
            tracing::warn!(job_id = %job.id, %provider, page, error = %err, "malformed provider page; cursor unchanged");
        } else {
            tracing::warn!(job_id = %job.id, %provider, page, error = %err, "provider page failed; cursor unchanged");
        }
        self.emit(StatusEvent::ProviderFailed {
            job_id: job.id.clone(),
            provider,
            page,
            error: err.to_string(),
        });
        ProviderIssue {
            provider,
            page,
            message: err.to_string(),
            malformed: err.is_malformed(),
            at: Utc::now(),
        }
    }
}

fn provider_index(provider: Provider) -> usize {
    match provider {
        Provider::Copart => 0,
        Provider::Iaai => 1,
    }
}

fn store_failure_outcome(err: &DbError) -> WorkerOutcome {
    if err.is_transient() {
        WorkerOutcome::Yielded(YieldReason::StoreUnavailable)
    } else {
        WorkerOutcome::NeedsAttention(err.to_string())
    }
}
