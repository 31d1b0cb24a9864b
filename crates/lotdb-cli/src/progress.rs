use std::sync::Arc;

use lotdb_collector::{
    MakeProgress, Scheduler, SchedulerSettings, StatusReporter, StatusSettings, WorkerSettings,
};
use lotdb_core::{AppConfig, Provider};
use lotdb_db::CheckpointStore;
use lotdb_providers::{CopartClient, IaaiClient, ProviderClientConfig, TracingSink};

/// Prints per-make progress from the stored checkpoints. The scheduler built
/// here is never started; it only backs the status reporter.
pub(crate) async fn run_progress(
    store: Arc<dyn CheckpointStore>,
    config: &AppConfig,
    make: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let copart = CopartClient::new(&ProviderClientConfig::from_app_config(Provider::Copart, config))?;
    let iaai = IaaiClient::new(&ProviderClientConfig::from_app_config(Provider::Iaai, config))?;
    let scheduler = Scheduler::new(
        Arc::new(copart),
        Arc::new(iaai),
        store,
        Arc::new(TracingSink),
        WorkerSettings::from_app_config(config),
        SchedulerSettings::from_app_config(config),
    );
    let reporter = StatusReporter::new(scheduler, StatusSettings::from_app_config(config));

    let progress = filter_make(reporter.vehicle_progress().await?, make);

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    if progress.is_empty() {
        println!("no checkpoints recorded yet");
        return Ok(());
    }

    println!(
        "{:<16} {:>6} {:>8} {:>8} {:>10} {:>7}  {:<15} last collected",
        "make", "scopes", "copart", "iaai", "records", "pct", "activity"
    );
    for row in &progress {
        println!("{}", format_row(row));
    }
    Ok(())
}

pub(crate) fn filter_make(progress: Vec<MakeProgress>, make: Option<&str>) -> Vec<MakeProgress> {
    match make {
        Some(make) => progress
            .into_iter()
            .filter(|row| row.make.eq_ignore_ascii_case(make.trim()))
            .collect(),
        None => progress,
    }
}

pub(crate) fn format_row(row: &MakeProgress) -> String {
    let activity = serde_json::to_value(row.activity)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    let last = row
        .last_collected_at
        .map_or_else(|| "-".to_owned(), |t| t.format("%Y-%m-%d %H:%M").to_string());
    format!(
        "{:<16} {:>6} {:>8} {:>8} {:>10} {:>6.1}%  {:<15} {}",
        row.make,
        row.scopes,
        row.copart_pages,
        row.iaai_pages,
        row.total_records,
        row.percent_complete,
        activity,
        last,
    )
}
