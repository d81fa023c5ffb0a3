use std::process::ExitCode;

use cli::Command;
use config::AegisConfig;

mod agent;
mod cli;
mod config;
mod orchestrator;
mod signals;
mod wire;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();

    let args = cli::get_cli_args();
    let config = match AegisConfig::try_init(&args.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Unable to load configuration from {:?}: {err}", args.config);
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Agent => agent::run(&config.agent).await.map_err(|e| e.to_string()),
        Command::Orchestrator => orchestrator::run(&config.orchestrator)
            .await
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
