mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use lotdb_collector::{
    Scheduler, SchedulerSettings, StatusReporter, StatusSettings, WorkerSettings,
};
use lotdb_core::Provider;
use lotdb_db::PgCheckpointStore;
use lotdb_providers::{CopartClient, IaaiClient, ProviderClientConfig, TracingSink};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(lotdb_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = lotdb_db::PoolConfig::from_app_config(&config);
    let pool = lotdb_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = lotdb_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let copart = CopartClient::new(&ProviderClientConfig::from_app_config(Provider::Copart, &config))?;
    let iaai = IaaiClient::new(&ProviderClientConfig::from_app_config(Provider::Iaai, &config))?;
    let collector = Scheduler::new(
        Arc::new(copart),
        Arc::new(iaai),
        Arc::new(PgCheckpointStore::new(pool.clone())),
        Arc::new(TracingSink),
        WorkerSettings::from_app_config(&config),
        SchedulerSettings::from_app_config(&config),
    );

    let catalog = lotdb_core::load_catalog(&config.catalog_path)?;
    let summary = collector.rebuild_queue(&catalog).await?;
    tracing::info!(
        enqueued = summary.enqueued,
        skipped_complete = summary.skipped_complete,
        skipped_attention = summary.skipped_attention,
        "queue rebuilt at boot"
    );
    if config.scheduler_autostart {
        collector.start();
    }

    let _cron = scheduler::build_scheduler(collector.clone(), Arc::clone(&config)).await?;

    let auth = AuthState::from_env(matches!(config.env, lotdb_core::Environment::Development))?;
    let reporter = StatusReporter::new(collector.clone(), StatusSettings::from_app_config(&config));
    let app = build_app(
        AppState {
            pool,
            scheduler: collector.clone(),
            reporter,
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "lotdb server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the worker finish its current page and persist its checkpoint.
    collector.stop();
    collector.wait_until_idle().await;
    tracing::info!("collector stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
