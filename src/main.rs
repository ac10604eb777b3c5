mod app;
mod bootstrap;
mod config;
mod context;
mod db;
mod domain;
mod infrastructure;
mod tasks;
mod telegram;
mod webhook;

use std::process::ExitCode;

use config::{env_lookup, DirectoryConfig, LoggingConfig};
use infrastructure::{directories, logging};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let paths = match directories::ensure_directories(&DirectoryConfig::from_lookup(&env_lookup)) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("failed to prepare directories: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init_tracing(&LoggingConfig::from_lookup(&env_lookup), &paths) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match app::run(paths) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(target: "lifecycle", error = %format!("{err:#}"), "bot exited with an error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
