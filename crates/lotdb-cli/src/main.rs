mod collect;
mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lotdb_db::{CheckpointStore, PgCheckpointStore, ResetRequest};
use lotdb_core::{AppConfig, ScopeKey};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lotdb-cli")]
#[command(about = "Operator tools for the lotdb auction collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Priority catalog tools
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Print per-make collection progress
    Progress {
        /// Only show this make
        #[arg(long)]
        make: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Collect one make in the foreground until it completes or yields
    Collect {
        #[arg(long)]
        make: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        year_from: Option<u16>,

        #[arg(long)]
        year_to: Option<u16>,

        /// Override the per-run page budget
        #[arg(long)]
        pages: Option<u32>,
    },
    /// Zero a make's checkpoint so it is collected again from page 1
    RestartMake {
        #[arg(long)]
        make: String,

        #[arg(long)]
        model: Option<String>,

        /// Why the reset is needed; stored in the audit log
        #[arg(long)]
        reason: String,

        /// Who is asking; stored in the audit log
        #[arg(long = "by")]
        requested_by: String,
    },
    /// Show recent checkpoint resets
    Resets {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
enum CatalogCommands {
    /// Parse and validate the catalog file
    Validate {
        /// Catalog path; defaults to LOTDB_CATALOG_PATH
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("LOTDB_LOG_LEVEL").unwrap_or_else(|_| "info".into())))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("lotdb-cli: run with --help to list commands");
        return Ok(());
    };

    match command {
        Commands::Catalog {
            command: CatalogCommands::Validate { path },
        } => validate_catalog(path)?,
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            let (_, pool) = connect().await?;
            lotdb_db::health_check(&pool).await?;
            println!("database ok");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let (_, pool) = connect().await?;
            let applied = lotdb_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Progress { make, json } => {
            let (config, pool) = connect().await?;
            let store = Arc::new(PgCheckpointStore::new(pool));
            progress::run_progress(store, &config, make.as_deref(), json).await?;
        }
        Commands::Collect {
            make,
            model,
            year_from,
            year_to,
            pages,
        } => {
            let (config, pool) = connect().await?;
            let store = Arc::new(PgCheckpointStore::new(pool));
            let args = collect::CollectArgs {
                make,
                model,
                year_from,
                year_to,
                page_budget: pages,
            };
            collect::run_collect(store, &config, &args).await?;
        }
        Commands::RestartMake {
            make,
            model,
            reason,
            requested_by,
        } => {
            let (_, pool) = connect().await?;
            let store = PgCheckpointStore::new(pool);
            restart_make(&store, &make, model.as_deref(), &reason, &requested_by).await?;
        }
        Commands::Resets { limit } => {
            let (_, pool) = connect().await?;
            let store = PgCheckpointStore::new(pool);
            for reset in store.list_resets(limit.clamp(1, 200)).await? {
                println!(
                    "{}  {:<24} by {:<16} copart={} iaai={} records={}  {}",
                    reset.reset_at.format("%Y-%m-%d %H:%M:%S"),
                    reset.scope,
                    reset.requested_by,
                    reset.previous.copart_last_page,
                    reset.previous.iaai_last_page,
                    reset.previous.total_records_collected,
                    reset.reason,
                );
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<(AppConfig, PgPool)> {
    let config = lotdb_core::load_app_config()?;
    let pool_config = lotdb_db::PoolConfig::from_app_config(&config);
    let pool = lotdb_db::connect_pool(&config.database_url, pool_config).await?;
    Ok((config, pool))
}

fn validate_catalog(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(p) => p,
        None => lotdb_core::load_app_config()
            .map(|c| c.catalog_path)
            .unwrap_or_else(|_| PathBuf::from("./config/catalog.yaml")),
    };
    let catalog = lotdb_core::load_catalog(&path)?;
    let jobs = catalog.jobs()?;
    println!("{}: {} entries OK", path.display(), jobs.len());
    for job in &jobs {
        println!("  tier {}  {}", job.priority.0, job.label());
    }
    Ok(())
}

/// Audited reset straight against the store. The server may still be
/// collecting the scope; stop it first if in doubt.
async fn restart_make(
    store: &dyn CheckpointStore,
    make: &str,
    model: Option<&str>,
    reason: &str,
    requested_by: &str,
) -> anyhow::Result<()> {
    if reason.trim().is_empty() || requested_by.trim().is_empty() {
        anyhow::bail!("--reason and --by must not be blank");
    }
    let scope = ScopeKey::new(make, model);
    let reset = store
        .reset(
            &scope,
            &ResetRequest {
                requested_by: requested_by.trim().to_owned(),
                reason: reason.trim().to_owned(),
            },
        )
        .await
        .map_err(|e| match e {
            lotdb_db::DbError::NotFound => anyhow::anyhow!("no checkpoint exists for {scope}"),
            other => other.into(),
        })?;
    println!(
        "reset {} (was copart page {}, iaai page {}, {} records); audit id {}",
        reset.scope,
        reset.previous.copart_last_page,
        reset.previous.iaai_last_page,
        reset.previous.total_records_collected,
        reset.id,
    );
    Ok(())
}

#[cfg(test)]
mod tests;
