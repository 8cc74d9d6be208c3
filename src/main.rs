mod app;
mod cache;
mod clock;
mod config;
mod event;
mod net;
mod tasks;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStorage, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline-capable asset caching proxy")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml, then $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Handle newline-delimited JSON events from stdin (default)
  Run,
  /// List cache stores and their entry counts
  Stores,
  /// Delete every cache store
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging()?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command.unwrap_or(Command::Run) {
    Command::Run => run(&config, storage).await,
    Command::Stores => {
      for name in storage.store_names()? {
        println!("{}\t{}", name, storage.keys(&name)?.len());
      }
      Ok(())
    }
    Command::Clear => {
      for name in storage.store_names()? {
        storage.delete_store(&name)?;
        println!("deleted {}", name);
      }
      Ok(())
    }
  }
}

async fn run(config: &config::Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let collaborators = worker::Collaborators {
    network: Arc::new(net::HttpNetwork::new()?),
    clock: Arc::new(clock::SystemClock),
    notifier: Arc::new(app::LogNotifier),
    clients: Arc::new(app::HeadlessWindows::default()),
  };
  let worker = worker::Worker::new(config, storage, collaborators)?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let printer = tokio::spawn(async move {
    while let Some(report) = rx.recv().await {
      println!("{}", report);
    }
  });

  let events = event::EventHandler::new(BufReader::new(tokio::io::stdin()));
  let mut app = app::App::new(worker, tx);
  app.run(events).await?;

  // Close the output channel so the printer finishes
  drop(app);
  printer.await?;

  Ok(())
}

/// Log to a file in the data directory; stdout carries event reports.
fn init_logging() -> Result<WorkerGuard> {
  let dir = config::data_dir()?;
  std::fs::create_dir_all(&dir)?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
    &dir,
    "swcache.log",
  ));
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
