//! Trail Cache Probe - headless driver for the trail cache

mod generate;
mod logging;
mod replay;
mod settings;

use clap::Parser;
use settings::{Command, Settings};
use std::process::ExitCode;

/// Error types for the probe binary
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Cache(#[from] trail_cache_lib::CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn main() -> ExitCode {
    let settings = Settings::parse();
    logging::setup_logging();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(async {
        match &settings.command {
            Command::Replay(args) => replay::run(args).await.map(|_| ()),
            Command::Generate(args) => generate::run(args).await.map(|_| ()),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
