//! `sod` - FDIC Summary of Deposits pipeline

use clap::Parser;
use sod_common::logging::{init_logging, LogConfig, LogLevel};
use sod_ingest::cli::Cli;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let base = LogConfig::builder()
        .level(level)
        .log_file_prefix("sod")
        .filter_directives("hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence
    let log_config = match base.clone().with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring invalid logging environment: {}", e);
            base
        },
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    match sod_ingest::commands::execute(&cli).await {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}
