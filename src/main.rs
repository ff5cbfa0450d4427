use anyhow::Context;
use clap::Parser;
use dcq::cli::{Cli, Command};
use dcq::engine::{Engine, EngineHandle};
use dcq::events::Events;
use dcq::network::OfflineNetwork;
use dcq::peer_id::PeerId;
use dcq::queue::{DownloadQueue, JobSnapshot};
use dcq::store::JsonStore;
use dcq::tth::TreeHash;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.queue_config();
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("create data directory {}", cli.data_dir.0.display()))?;
    let store = Arc::new(JsonStore::open(cli.data_dir.store_path())?);

    let queue = DownloadQueue::startup(config, store, Box::new(OfflineNetwork), Events::none())?;
    let (engine, join) = Engine::start(queue);

    let result = run(&engine, cli.command).await;
    engine.shutdown();
    join.await.context("download engine panicked")??;
    result
}

async fn run(engine: &EngineHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            for job in engine.snapshot().await? {
                println!("{}", format_job(&job));
            }
        }
        Command::Add {
            peer,
            hash,
            size,
            destination,
        } => {
            if !engine.enqueue_file(peer, hash, size, destination).await? {
                anyhow::bail!("{hash} is already queued");
            }
        }
        Command::Rm { hash } => {
            find(engine, &hash).await?;
            engine.remove(hash).await?;
        }
        Command::Prio { hash, priority } => {
            find(engine, &hash).await?;
            engine.set_priority(hash, priority).await?;
        }
        Command::Clean => {
            let (partials, lists) = engine.sweep().await?;
            println!("removed {partials} partial files and {lists} file lists");
        }
    }
    Ok(())
}

async fn find(engine: &EngineHandle, hash: &TreeHash) -> anyhow::Result<JobSnapshot> {
    engine
        .snapshot()
        .await?
        .into_iter()
        .find(|job| job.hash == *hash)
        .with_context(|| format!("{hash} is not queued"))
}

fn format_job(job: &JobSnapshot) -> String {
    let peers: Vec<String> = job.peers.iter().map(PeerId::to_string).collect();
    let mut line = format!(
        "{} {:>9} {:>12}/{:<12} {} [{}]",
        job.hash,
        job.priority,
        job.have,
        job.size,
        job.destination.display(),
        peers.join(",")
    );
    if let Some(error) = &job.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}
