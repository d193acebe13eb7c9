use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use offsync::agent::Agent;
use offsync::cache::SqliteStore;
use offsync::config::Config;
use offsync::event::{AgentEvent, EventHandler};
use offsync::net::ReqwestClient;
use offsync::replay::ReplayQueue;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first resource and mutation synchronization agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Activate immediately instead of waiting for old contexts to close
  #[arg(long)]
  skip_waiting: bool,

  /// Override the static namespace version tag
  #[arg(long)]
  static_tag: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(tag) = args.static_tag {
    config.versions.static_tag = tag;
  }

  // Keep the appender guard alive for the life of the process
  let _guard = init_tracing(&config);

  let store = SqliteStore::open()?;
  let net = ReqwestClient::new()?;
  let queue = ReplayQueue::open(config.replay.max_attempts)?;

  let mut events = EventHandler::new(
    Arc::new(net.clone()),
    config.origin.clone(),
    Duration::from_secs(config.probe.interval_secs),
  );

  // Ctrl-C ends the run loop cleanly
  let shutdown_tx = events.sender();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      let _ = shutdown_tx.send(AgentEvent::Shutdown);
    }
  });

  let mut agent = Agent::start(config, store, net, queue, args.skip_waiting).await?;
  agent.run(&mut events).await?;

  Ok(())
}

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "offsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

      None
    }
  }
}
