//! `collect`: run one job in the foreground against the live providers.
//!
//! Ctrl-C requests a cooperative stop; the worker finishes the page in
//! flight and saves its checkpoint before returning.

use std::sync::Arc;

use lotdb_collector::{CollectorWorker, StatusEvent, StopFlag, WorkerOutcome, WorkerSettings};
use lotdb_core::{AppConfig, CollectionJob, Priority, Provider};
use lotdb_db::CheckpointStore;
use lotdb_providers::{CopartClient, IaaiClient, ProviderClientConfig, TracingSink};
use tokio::sync::broadcast;

#[derive(Debug)]
pub(crate) struct CollectArgs {
    pub make: String,
    pub model: Option<String>,
    pub year_from: Option<u16>,
    pub year_to: Option<u16>,
    pub page_budget: Option<u32>,
}

impl CollectArgs {
    pub(crate) fn to_job(&self) -> anyhow::Result<CollectionJob> {
        Ok(CollectionJob::with_default_years(
            &self.make,
            self.model.as_deref(),
            self.year_from,
            self.year_to,
            Priority::URGENT,
        )?)
    }
}

pub(crate) fn with_page_budget(mut settings: WorkerSettings, page_budget: Option<u32>) -> WorkerSettings {
    if let Some(budget) = page_budget {
        settings.page_budget = budget.max(1);
    }
    settings
}

/// # Errors
///
/// Returns an error if the job is invalid, a provider client cannot be
/// built, or the job ends needing operator attention.
pub(crate) async fn run_collect(
    store: Arc<dyn CheckpointStore>,
    config: &AppConfig,
    args: &CollectArgs,
) -> anyhow::Result<()> {
    let job = args.to_job()?;
    let copart = CopartClient::new(&ProviderClientConfig::from_app_config(Provider::Copart, config))?;
    let iaai = IaaiClient::new(&ProviderClientConfig::from_app_config(Provider::Iaai, config))?;

    let (events, mut rx) = broadcast::channel(lotdb_collector::EVENT_CHANNEL_CAPACITY);
    let worker = CollectorWorker::new(
        Arc::new(copart),
        Arc::new(iaai),
        store,
        Arc::new(TracingSink),
        with_page_budget(WorkerSettings::from_app_config(config), args.page_budget),
        events,
    );

    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                StatusEvent::PageCollected {
                    provider,
                    page,
                    records,
                    total_records,
                    ..
                } => println!(
                    "{:<7} page {page:>4}: {records:>4} records (total {total_records})",
                    provider.as_str()
                ),
                StatusEvent::ProviderFailed {
                    provider, page, error, ..
                } => println!("{:<7} page {page:>4}: failed: {error}", provider.as_str()),
                _ => {}
            }
        }
    });

    let stop = Arc::new(StopFlag::new());
    let ctrl_c_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received; stopping after the current page");
            ctrl_c_stop.request();
        }
    });

    println!("collecting {} ({})", job.label(), job.id);
    let report = worker.run(&job, &stop).await;
    drop(worker);
    printer.await.ok();

    println!(
        "{:?}: {} page(s), {} record(s) this run; copart page {}{}, iaai page {}{}, {} total",
        report.outcome,
        report.pages_collected,
        report.records_collected,
        report.checkpoint.copart_last_page,
        if report.checkpoint.copart_completed { " (done)" } else { "" },
        report.checkpoint.iaai_last_page,
        if report.checkpoint.iaai_completed { " (done)" } else { "" },
        report.checkpoint.total_records_collected,
    );

    if let WorkerOutcome::NeedsAttention(reason) = report.outcome {
        anyhow::bail!("{} needs operator attention: {reason}", job.scope_key());
    }
    Ok(())
}
