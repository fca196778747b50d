use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use telescope::server::{Daemon, LoggingSection, ServerConfig};
use telescope::version;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "telescope", about = "Telescope API server", version)]
struct Args {
  #[arg(long, env = "TELESCOPE_PG_URL")]
  pg_url: Option<String>,
  #[arg(long, env = "TELESCOPE_REDIS_URL")]
  redis_url: Option<String>,
  #[arg(short, long)]
  port: Option<u16>,
  #[arg(long)]
  host: Option<String>,
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  /// Print the effective configuration as YAML and exit
  #[arg(long)]
  print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    ServerConfig::from_file(path)?
  } else {
    ServerConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(url) = args.pg_url {
    config.postgres.url = url;
  }
  if let Some(url) = args.redis_url {
    config.redis.url = Some(url);
  }
  if let Some(port) = args.port {
    config.server.port = port;
  }
  if let Some(host) = args.host {
    config.server.host = host;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  if args.print_config {
    print!("{}", config.to_yaml()?);
    return Ok(());
  }

  init_tracing(&config.logging);
  tracing::info!("Starting {}", version::full_name());

  let grace = Duration::from_secs(config.server.shutdown_grace_secs);
  let daemon = Arc::new(Daemon::new(config));
  let daemon_clone = daemon.clone();

  // Handle shutdown signals (SIGINT, SIGTERM)
  tokio::spawn(async move {
    shutdown_signal().await;
    daemon_clone.shutdown();

    // Connections that have not drained by now are abandoned
    tokio::time::sleep(grace).await;
    tracing::warn!("Graceful shutdown timed out after {:?}", grace);
    std::process::exit(1);
  });

  daemon.run().await
}

fn init_tracing(logging: &LoggingSection) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.level.clone().into());
  let registry = tracing_subscriber::registry().with(filter);
  if logging.production {
    registry
      .with(tracing_subscriber::fmt::layer().json())
      .init();
  } else {
    registry.with(tracing_subscriber::fmt::layer()).init();
  }
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("Failed to listen for Ctrl+C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        tracing::error!("Failed to install SIGTERM handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
