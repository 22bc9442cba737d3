//! Forklift - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use forklift::cli::{self, Cli};
use forklift::services::ServiceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let registry = ServiceRegistry::builtin();

    let config = match cli.resolve(&registry) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over --loglevel
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("forklift={}", config.loglevel.directive())));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    if config.unique {
        tracing::info!("New application ID is '{}'", config.application_id);
    }
    let code = cli::run(&config, &registry, &cli.command).await?;
    std::process::exit(code);
}
