use clap::{Parser, Subcommand};
use frenzy_proxy::{Config, ProxyServer};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "frenzy", version, about = "Rewriting HTTP proxy")]
struct Args {
    /// Settings file; created secrets are written back to it
    #[arg(short, long, env = "FRENZY_CONFIG", default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy (default)
    Serve,
    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_bootstrap(&args.config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting frenzy with config {}", args.config);
            let server = ProxyServer::new(config)?;
            tokio::select! {
                result = server.run() => result?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            }
        }
        Command::Config => print!("{}", config.to_yaml()?),
    }

    Ok(())
}
