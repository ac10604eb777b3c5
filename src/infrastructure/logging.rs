use std::{io, thread};

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::LoggingConfig, infrastructure::directories::ResolvedPaths};

static INIT: OnceCell<()> = OnceCell::new();
static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const LOG_FILE_PREFIX: &str = "manga-bot.log";

/// Creators poll the job queue every idle period, so per-statement sqlx logs
/// and HTTP client internals are held at `warn` unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &[&str] = &[
    "sqlx::query=warn",
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "h2=warn",
];

fn filter_directives(level: &str) -> String {
    std::iter::once(level.trim())
        .chain(QUIET_DEPENDENCIES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn init_tracing(config: &LoggingConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let directives = filter_directives(&config.level);
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&directives))
            .unwrap_or_else(|_| EnvFilter::new(filter_directives("info")));

        let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, LOG_FILE_PREFIX);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);

        // Thread names tell the cooperative runtime apart from the server's.
        let console_layer = fmt::layer()
            .with_writer(io::stdout)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(true);

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::info!(logs = %paths.logs_dir.display(), filter = %directives, "tracing initialized");
        Ok(())
    })?;
    Ok(())
}

/// Logs which OS thread drives `runtime`, once per runtime at startup.
pub fn announce_runtime(runtime: &'static str) {
    let current = thread::current();
    tracing::info!(
        target: "lifecycle",
        runtime,
        thread = current.name().unwrap_or("unnamed"),
        "runtime started"
    );
}
