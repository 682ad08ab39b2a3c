//! Pheromone - message hub for a swarm of cooperating agents.

use clap::Parser;
use std::process::ExitCode;

use pheromone_hub::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
