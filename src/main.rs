//! tool-broker — a tool-routing broker bridging provider connections to a
//! JSON-RPC tool-invocation surface.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tool_broker::broker::Broker;
use tool_broker::{cli::Cli, config::Config, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.ws_port {
                config.server.ws_port = port;
            }
            if let Some(port) = cli.http_port {
                config.server.http_port = port;
            }
            if let Some(ref url) = cli.ollama_url {
                config.upstream.base_url = url.clone();
            }
            if let Some(ref model) = cli.ollama_model {
                config.upstream.default_model = model.clone();
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
        ws_port = config.server.ws_port,
        http_port = config.server.http_port,
        "starting tool-broker"
    );

    let broker = match Broker::new(&config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("Failed to create broker: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = broker.run().await {
        error!("broker error: {e}");
        return ExitCode::FAILURE;
    }

    info!("tool-broker shutdown complete");
    ExitCode::SUCCESS
}
