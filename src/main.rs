//! authgate - OIDC authentication gate for an upstream HTTP service

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use authgate::{
    cli::Cli, config::Config, gate::Gate, oidc::ProviderMetadata, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Pick up a local .env before anything reads the environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        issuer = %config.provider.issuer,
        upstream = %config.upstream.url,
        "Starting authgate"
    );

    // Discovery is startup-fatal: no routes are served until the provider
    // metadata has been fetched and validated.
    let http = match reqwest::Client::builder()
        .timeout(config.provider.timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let metadata = match ProviderMetadata::discover(&http, &config.provider.issuer).await {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Provider discovery failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gate = match Gate::new(config, metadata) {
        Ok(gate) => gate,
        Err(e) => {
            error!("Failed to create gate: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gate.run().await {
        error!("Gate error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
