use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lode_lease::RegistryPersister;
use lode_sched::Scheduler;
use lode_store::{BlobStore, FsBlobStore};
use lode_types::{ReaderId, Registry};
use lode_worker::Worker;

use crate::cli::*;
use crate::config::LodeConfig;
use crate::sink::StdoutSink;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = LodeConfig::load(cli.config.as_deref())?;
    if let Some(root) = &cli.root {
        config.store.root = root.clone();
    }
    let store: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::open(&config.store.root)
            .with_context(|| format!("cannot open store at {}", config.store.root.display()))?,
    );
    let persister = RegistryPersister::new(store.clone(), config.worker.lease.clone());

    match cli.command {
        Command::Run(args) => cmd_run(store, config, args).await,
        Command::Init => cmd_init(store, persister, config).await,
        Command::Status => cmd_status(persister, cli.format).await,
        Command::Release(args) => cmd_release(persister, args).await,
        Command::BreakLease => cmd_break_lease(persister).await,
    }
}

async fn cmd_run(store: Arc<dyn BlobStore>, mut config: LodeConfig, args: RunArgs) -> anyhow::Result<()> {
    if args.reader_id.is_some() {
        config.worker.reader_id = args.reader_id;
    }
    let sink = Arc::new(StdoutSink::new(config.output.blob_path_field()));
    let worker = Worker::new(store, sink, config.worker)?;
    info!(reader = %worker.reader(), root = %config.store.root.display(), "starting worker");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received; finishing current pass");
            }
            shutdown.cancel();
        }
    });
    worker.run(shutdown).await?;
    Ok(())
}

async fn cmd_init(store: Arc<dyn BlobStore>, persister: RegistryPersister, config: LodeConfig) -> anyhow::Result<()> {
    let policy = config.worker.scheduler.create_policy;
    let scheduler = Scheduler::new(store, persister.clone(), config.worker.scheduler, ReaderId::generate())?;
    let listing = scheduler.candidates().await?;
    if scheduler.bootstrap(&listing).await? {
        println!(
            "{} Created registry {} ({:?}, {} blobs)",
            "✓".green().bold(),
            persister.registry_path().bold(),
            policy,
            listing.len()
        );
    } else {
        println!("Registry {} already exists.", persister.registry_path().bold());
    }
    Ok(())
}

async fn cmd_status(persister: RegistryPersister, format: OutputFormat) -> anyhow::Result<()> {
    let registry = persister.load().await?;
    match format {
        OutputFormat::Json => {
            let json = registry.to_json()?;
            println!("{}", String::from_utf8_lossy(&json));
        }
        OutputFormat::Text => print_registry(&registry),
    }
    Ok(())
}

fn print_registry(registry: &Registry) {
    if registry.is_empty() {
        println!("Registry is empty.");
        return;
    }
    let width = registry.keys().map(str::len).max().unwrap_or(4).max(4);
    let header = format!("{:<width$}  {:>12}  {:>5}  {}", "BLOB", "OFFSET", "GEN", "OWNER");
    println!("{}", header.bold());
    for item in registry.items() {
        let owner = match &item.owner {
            Some(reader) => reader.short_id().yellow(),
            None => "-".dimmed(),
        };
        println!(
            "{:<width$}  {:>12}  {:>5}  {}",
            item.blob_id, item.offset, item.generation, owner
        );
    }
    let owned = registry.items().filter(|i| i.owner.is_some()).count();
    println!("\n{} blobs, {} claimed", registry.len(), owned);
}

async fn cmd_release(persister: RegistryPersister, args: ReleaseArgs) -> anyhow::Result<()> {
    let reader = ReaderId::new(args.reader)?;
    let released = persister.unregister_reader(&reader).await?;
    println!("{} Released {} claims held by {}", "✓".green(), released, reader.as_str().yellow());
    Ok(())
}

async fn cmd_break_lease(persister: RegistryPersister) -> anyhow::Result<()> {
    persister.break_lease().await?;
    println!("{} Broke lease on {}", "✓".green(), persister.registry_path().bold());
    Ok(())
}
