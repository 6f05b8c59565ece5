use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use coursescrap::{cli::Cli, info_time};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let start_time = Local::now();
    let cli = Cli::parse();

    match cli.run().await {
        Ok(()) => {
            info_time!(start_time, "Full program time:");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%e, "critical error");
            ExitCode::FAILURE
        }
    }
}
