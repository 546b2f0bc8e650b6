use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use palgate_rs::api::{self, DEFAULT_BASE_URL, PalgateClientFactory};
use palgate_rs::entity::EntityRegistry;
use palgate_rs::integration::{migrate_entry, setup_entry};
use palgate_rs::migration::{MigrationDefaults, migrate};
use palgate_rs::store::{ConfigStore, JsonFileStore};

fn cli() -> Command {
    let gate_arg = || {
        Arg::new("gate")
            .value_name("GATE_ID")
            .help("Gate (device) id as listed in the config entry")
            .required(true)
    };

    Command::new("palgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Control Palgate garage gates from a stored config entry")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help("Config entry JSON file")
                .env("PALGATE_CONFIG")
                .default_value("palgate.json"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .value_name("URL")
                .help("Palgate API base URL")
                .env("PALGATE_BASE_URL")
                .default_value(DEFAULT_BASE_URL),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("migrate")
                .about("Upgrade the config entry to the current schema version")
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .help("Print the migrated entry instead of saving it")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("show").about("Print the stored config entry"))
        .subcommand(Command::new("status").about("Print the state of every gate"))
        .subcommand(Command::new("open").about("Open a gate").arg(gate_arg()))
        .subcommand(
            Command::new("stop")
                .about("Stop a gate (needs allow_invert_as_stop)")
                .arg(gate_arg()),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    // Safe due to defaults
    let config_path = matches.get_one::<String>("config").cloned().unwrap_or_default();
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let store = JsonFileStore::new(&config_path);

    match matches.subcommand() {
        Some(("migrate", sub)) => run_migrate(&store, sub.get_flag("dry-run")),
        Some(("show", _)) => {
            let entry = store.load()?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(())
        }
        Some(("status", _)) => run_status(&store, &base_url),
        Some((action @ ("open" | "stop"), sub)) => run_action(&store, &base_url, action, sub).await,
        _ => unreachable!("subcommand_required"),
    }
}

fn run_migrate(store: &JsonFileStore, dry_run: bool) -> Result<()> {
    let defaults = MigrationDefaults::default();

    if dry_run {
        let entry = store.load()?;
        let outcome = migrate(&entry.data, entry.version, Some(&entry.title), &defaults);
        println!("Version: {} -> {}", entry.version, outcome.version);
        println!("{}", serde_json::to_string_pretty(&outcome.record)?);
        return Ok(());
    }

    let before = store.load()?.version;
    if migrate_entry(store, &defaults)? {
        println!(
            "Migrated {} from version {} to {}",
            store.path().display(),
            before,
            store.load()?.version
        );
    } else {
        println!("{} is already at version {}", store.path().display(), before);
    }
    Ok(())
}

fn load_entities(store: &JsonFileStore, base_url: &str) -> Result<EntityRegistry> {
    let factory = PalgateClientFactory::new(api::http_client()?, base_url);
    let mut registry = EntityRegistry::new();
    setup_entry(store, &mut registry, &factory)
        .with_context(|| format!("Failed to set up entry from {}", store.path().display()))?;
    Ok(registry)
}

fn run_status(store: &JsonFileStore, base_url: &str) -> Result<()> {
    let registry = load_entities(store, base_url)?;
    for cover in registry.covers() {
        println!("{}: {}", cover.unique_id, cover.state());
    }
    Ok(())
}

async fn run_action(
    store: &JsonFileStore,
    base_url: &str,
    action: &str,
    sub: &ArgMatches,
) -> Result<()> {
    let gate = sub.get_one::<String>("gate").context("Missing gate id")?;
    let registry = load_entities(store, base_url)?;
    let cover = registry
        .cover(gate)
        .with_context(|| format!("Gate {} is not in the config entry", gate))?;

    if action == "open" {
        cover.open_cover().await?;
    } else {
        cover.stop_cover().await?;
    }
    println!("{}: {}", cover.unique_id, cover.state());
    Ok(())
}
