use super::*;

use lotdb_collector::{Activity, MakeProgress, WorkerSettings};
use lotdb_core::{Checkpoint, CollectionJob, Priority};
use lotdb_db::MemoryCheckpointStore;

#[test]
fn parses_db_ping_command() {
    let cli = Cli::try_parse_from(["lotdb-cli", "db", "ping"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn parses_db_migrate_command() {
    let cli = Cli::try_parse_from(["lotdb-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["lotdb-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_collect_with_overrides() {
    let cli = Cli::try_parse_from([
        "lotdb-cli",
        "collect",
        "--make",
        "Toyota",
        "--model",
        "Camry",
        "--year-from",
        "2012",
        "--pages",
        "5",
    ])
    .unwrap();

    match cli.command {
        Some(Commands::Collect {
            make,
            model,
            year_from,
            year_to,
            pages,
        }) => {
            assert_eq!(make, "Toyota");
            assert_eq!(model.as_deref(), Some("Camry"));
            assert_eq!(year_from, Some(2012));
            assert_eq!(year_to, None);
            assert_eq!(pages, Some(5));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn collect_requires_make() {
    assert!(Cli::try_parse_from(["lotdb-cli", "collect"]).is_err());
}

#[test]
fn restart_make_requires_reason_and_requester() {
    assert!(Cli::try_parse_from(["lotdb-cli", "restart-make", "--make", "BMW"]).is_err());

    let cli = Cli::try_parse_from([
        "lotdb-cli",
        "restart-make",
        "--make",
        "BMW",
        "--reason",
        "bad mileage parse",
        "--by",
        "ops",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::RestartMake { ref make, model: None, ref requested_by, .. })
            if make == "BMW" && requested_by == "ops"
    ));
}

#[test]
fn resets_limit_defaults_to_twenty() {
    let cli = Cli::try_parse_from(["lotdb-cli", "resets"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Resets { limit: 20 })));
}

#[test]
fn progress_flags_parse() {
    let cli = Cli::try_parse_from(["lotdb-cli", "progress", "--make", "Kia", "--json"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Progress { make: Some(ref m), json: true }) if m == "Kia"
    ));
}

#[test]
fn catalog_validate_accepts_path() {
    let cli = Cli::try_parse_from(["lotdb-cli", "catalog", "validate", "--path", "x.yaml"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Catalog {
            command: CatalogCommands::Validate { path: Some(_) }
        })
    ));
}

#[test]
fn collect_args_default_years_and_urgent_priority() {
    let args = collect::CollectArgs {
        make: "Honda".to_owned(),
        model: None,
        year_from: None,
        year_to: Some(2020),
        page_budget: None,
    };
    let job = args.to_job().unwrap();
    assert_eq!(job.priority, Priority::URGENT);
    assert_eq!(job.year_to, 2020);
    assert!(job.year_from <= 2020);
}

#[test]
fn collect_args_reject_blank_make() {
    let args = collect::CollectArgs {
        make: "  ".to_owned(),
        model: None,
        year_from: None,
        year_to: None,
        page_budget: None,
    };
    assert!(args.to_job().is_err());
}

#[test]
fn page_override_is_at_least_one() {
    let base = WorkerSettings::default();
    assert_eq!(collect::with_page_budget(base, Some(0)).page_budget, 1);
    assert_eq!(collect::with_page_budget(base, Some(7)).page_budget, 7);
    assert_eq!(collect::with_page_budget(base, None), base);
}

fn progress_row(make: &str) -> MakeProgress {
    MakeProgress {
        make: make.to_owned(),
        scopes: 1,
        total_records: 120,
        copart_pages: 4,
        iaai_pages: 2,
        percent_complete: 37.5,
        completed: false,
        activity: Activity::Active,
        last_collected_at: None,
    }
}

#[test]
fn progress_filter_is_case_insensitive() {
    let rows = vec![progress_row("Toyota"), progress_row("Kia")];
    let filtered = progress::filter_make(rows, Some("kia"));
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].make, "Kia");
}

#[test]
fn progress_row_shows_percent_and_activity() {
    let line = progress::format_row(&progress_row("Toyota"));
    assert!(line.starts_with("Toyota"));
    assert!(line.contains("37.5%"));
    assert!(line.contains("active"));
    assert!(line.trim_end().ends_with('-'));
}

#[tokio::test]
async fn restart_make_resets_existing_checkpoint() {
    let store = MemoryCheckpointStore::new();
    let job = CollectionJob::new("BMW", None, 2015, 2020, Priority::LUXURY).unwrap();
    store.insert(
        &job,
        Checkpoint {
            copart_last_page: 6,
            iaai_last_page: 3,
            total_records_collected: 410,
            ..Checkpoint::default()
        },
    );

    restart_make(&store, "BMW", None, "bad parse", "ops").await.unwrap();

    let record = store.record(&job.scope_key()).unwrap();
    assert_eq!(record.checkpoint.copart_last_page, 0);
    assert_eq!(record.checkpoint.total_records_collected, 0);
    assert_eq!(store.list_resets(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn restart_make_of_unknown_scope_fails() {
    let store = MemoryCheckpointStore::new();
    let err = restart_make(&store, "Lada", None, "why", "ops").await.unwrap_err();
    assert!(err.to_string().contains("no checkpoint"));
}

#[tokio::test]
async fn restart_make_rejects_blank_reason() {
    let store = MemoryCheckpointStore::new();
    assert!(restart_make(&store, "BMW", None, " ", "ops").await.is_err());
}
