use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden::config::ConfigFile;
use warden::daemon::Daemon;
use warden::error::Result;

/// Environment variable holding the tracing filter
const LOG_ENV: &str = "WARDEN_LOG";

/// Warden daemon - supervises the apps of one configuration file
#[derive(Parser, Debug)]
#[command(name = "warden-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "WARDEN_CONFIG", value_name = "FILE")]
    config: PathBuf,

    /// Control socket (overrides supervisor.socket_path)
    #[arg(short, long, env = "WARDEN_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("✗ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = ConfigFile::from_file(&args.config)?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.supervisor.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        config = %args.config.display(),
        apps = config.apps.len(),
        "starting warden daemon"
    );

    let daemon = Daemon::start(&config, args.socket)?;
    daemon.run().await
}
