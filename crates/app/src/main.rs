mod bootstrap;
mod cli;
mod notify;
mod telemetry;

use clap::Parser;
use tracing::info;
use storefront_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let cli = cli::Cli::parse();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    info!(stage = "app", env = %config.environment.as_str(), "storefront starting");

    cli::run(cli, &config).await
}
