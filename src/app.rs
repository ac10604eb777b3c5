use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use teloxide::Bot;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

use crate::{
    bootstrap::{self, Started},
    config::{env_lookup, AppConfig, StoreConfig},
    context::{http_client, AppContext},
    db::SqliteConnector,
    infrastructure::{
        directories::ResolvedPaths,
        logging::announce_runtime,
        runtime,
        shutdown::{install_signal_handlers, Shutdown},
    },
    tasks::MangaWorkers,
    telegram::{register_webhook, resolve_bot_username, TelegramPipeline},
    webhook::{
        self,
        bridge::{self, UpdateSender},
    },
};

/// Handed from the cooperative runtime to the server once workers are up.
struct Ready {
    config: Arc<AppConfig>,
    updates: UpdateSender,
}

/// Runs the bot until shutdown. Workers and bot processing live on a
/// single-threaded runtime; the webhook server on the main thread's
/// multi-threaded one.
pub fn run(paths: ResolvedPaths) -> Result<()> {
    let (shutdown, _) = Shutdown::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let cooperative = runtime::spawn_cooperative("cooperative-scheduler", {
        let shutdown = shutdown.clone();
        move || background(paths, shutdown, ready_tx)
    })
    .context("failed to spawn cooperative runtime thread")?;

    let ready = match ready_rx.blocking_recv() {
        Ok(Ok(ready)) => ready,
        Ok(Err(err)) => {
            join(cooperative);
            return Err(err);
        }
        Err(_) => {
            join(cooperative);
            return Err(anyhow!("cooperative runtime exited before startup completed"));
        }
    };

    let result = runtime::server_runtime()
        .context("failed to build webhook server runtime")
        .and_then(|server| server.block_on(serve_webhook(ready, shutdown.clone())));

    shutdown.trigger("webhook server stopped");
    join(cooperative);
    if result.is_ok() {
        tracing::info!(target: "lifecycle", "bot stopped");
    }
    result
}

fn join(handle: std::thread::JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(target: "lifecycle", "cooperative runtime thread panicked");
    }
}

async fn background(paths: ResolvedPaths, shutdown: Shutdown, ready: oneshot::Sender<Result<Ready>>) {
    announce_runtime("cooperative");
    let store_config = match StoreConfig::from_lookup(&env_lookup) {
        Ok(config) => config,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };
    let connector = SqliteConnector::new(paths.db_path.clone(), store_config);

    let started = bootstrap::start(
        env_lookup,
        &connector,
        AppContext::new,
        Arc::new(MangaWorkers),
        &shutdown,
    )
    .await;
    let Started {
        config,
        context,
        supervisor,
    } = match started {
        Ok(started) => started,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };

    let bot_username = resolve_bot_username(&context).await;
    let pipeline = Arc::new(TelegramPipeline::new(
        context.clone(),
        bot_username,
        supervisor.status_provider(),
    ));
    let (updates, receiver) = bridge::channel(config.webhook.queue_capacity);
    let pump = bridge::spawn_pump(receiver, pipeline, shutdown.subscribe());

    let handoff = Ready {
        config: config.clone(),
        updates,
    };
    if ready.send(Ok(handoff)).is_err() {
        shutdown.trigger("server side gone before startup completed");
    }

    shutdown.subscribe().notified().await;

    for (worker, status) in supervisor.statuses() {
        if status.faults > 0 {
            tracing::info!(target: "supervisor", worker = %worker, faults = status.faults, ticks = status.ticks, "worker fault summary");
        }
    }
    let grace = config.shutdown_timeout;
    supervisor.shutdown(grace).await;
    if timeout(grace, pump).await.is_err() {
        tracing::warn!(target: "lifecycle", "update pump did not stop within {:?}", grace);
    }
    if timeout(grace, context.store.close()).await.is_err() {
        tracing::warn!(target: "store", "store close did not finish within {:?}", grace);
    }
    tracing::info!(target: "lifecycle", "background runtime stopped");
}

async fn serve_webhook(ready: Ready, shutdown: Shutdown) -> Result<()> {
    announce_runtime("webhook-server");
    install_signal_handlers(shutdown.clone());
    let Ready { config, updates } = ready;

    let addr = SocketAddr::new(config.webhook.listen_addr, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {addr}"))?;

    let http = http_client()?;
    let bot = Bot::with_client(config.token.clone(), http.clone());
    register_webhook(&bot, &http, &config).await?;

    let app = webhook::router(config.token.clone(), config.webhook.secret.clone(), updates);
    webhook::serve(listener, app, shutdown.subscribe()).await
}
