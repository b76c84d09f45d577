use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod auth;
mod catalog;
mod config;
mod data_model;
mod events;
mod http_objects;
mod metrics;
mod migration;
mod placement;
mod providers;
mod routes;
mod service;
mod state_store;
mod utils;

use service::Service;

#[derive(Parser)]
#[command(version, about = "Multi-cloud storage orchestrator", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let cli = Cli::parse();
    let config = match config::ServerConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))
    {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err:#}");
            std::process::exit(1);
        }
    };

    let service = Service::new(config).await;
    match service {
        Ok(mut service) => {
            if let Err(err) = service.start().await {
                error!("error running service: {err:#}");
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!("error starting service: {err:#}");
            std::process::exit(1);
        }
    }
}
