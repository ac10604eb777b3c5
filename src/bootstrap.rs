use std::sync::Arc;

use thiserror::Error;

use crate::{
    config::{AppConfig, ConfigError},
    db::{StoreConnector, StoreUnavailable},
    domain::WorkerDescriptor,
    infrastructure::shutdown::Shutdown,
    tasks::supervisor::{self, RestartPolicy, SupervisorHandle, WorkerFactory},
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreUnavailable),
    #[error("failed to build shared context: {0:#}")]
    Context(anyhow::Error),
}

pub struct Started<C> {
    pub config: Arc<AppConfig>,
    pub context: C,
    pub supervisor: SupervisorHandle,
}

/// Startup up to the point where the request boundary may open:
/// configuration, one store connect, the shared context, then the worker set.
///
/// Must run inside the cooperative runtime; workers are spawned onto it.
pub async fn start<L, S, C, M>(
    lookup: L,
    connector: &S,
    make_context: M,
    factory: Arc<dyn WorkerFactory<C>>,
    shutdown: &Shutdown,
) -> Result<Started<C>, BootstrapError>
where
    L: Fn(&str) -> Option<String>,
    S: StoreConnector,
    C: Clone + Send + Sync + 'static,
    M: FnOnce(Arc<AppConfig>, S::Handle) -> anyhow::Result<C>,
{
    let config = Arc::new(AppConfig::from_lookup(lookup)?);
    config.log_resolved();

    let store = connector.connect().await?;
    let context = make_context(config.clone(), store).map_err(BootstrapError::Context)?;

    let policy = RestartPolicy {
        base: config.workers.fault_backoff,
        max: config.workers.fault_backoff_max,
    };
    let descriptors = WorkerDescriptor::fixed_set(config.workers.creators);
    let supervisor = supervisor::launch(&context, &descriptors, factory, policy, shutdown);

    Ok(Started {
        config,
        context,
        supervisor,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    use super::*;
    use crate::tasks::supervisor::{Tick, Worker};

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct RecordingConnector {
        events: EventLog,
        attempts: AtomicU32,
        fail: bool,
    }

    impl RecordingConnector {
        fn new(events: EventLog, fail: bool) -> Self {
            Self {
                events,
                attempts: AtomicU32::new(0),
                fail,
            }
        }
    }

    impl StoreConnector for RecordingConnector {
        type Handle = EventLog;

        fn connect(&self) -> BoxFuture<'_, Result<EventLog, StoreUnavailable>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if self.fail {
                    return Err(StoreUnavailable {
                        attempts: 1,
                        reason: "disk offline".into(),
                    });
                }
                self.events.lock().push("connect".into());
                Ok(self.events.clone())
            })
        }
    }

    struct LoggingWorker {
        descriptor: WorkerDescriptor,
        events: EventLog,
        started: bool,
    }

    impl Worker for LoggingWorker {
        fn tick(&mut self) -> BoxFuture<'_, anyhow::Result<Tick>> {
            Box::pin(async move {
                if !self.started {
                    self.started = true;
                    self.events.lock().push(format!("start:{}", self.descriptor));
                }
                Ok(Tick::Idle(Duration::from_millis(5)))
            })
        }
    }

    struct LoggingFactory;

    impl WorkerFactory<EventLog> for LoggingFactory {
        fn build(&self, descriptor: WorkerDescriptor, events: &EventLog) -> Box<dyn Worker> {
            Box::new(LoggingWorker {
                descriptor,
                events: events.clone(),
                started: false,
            })
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_env() -> impl Fn(&str) -> Option<String> {
        env(&[("TOKEN", "123:abc"), ("EXTERNAL_URL", "https://bot.example")])
    }

    #[tokio::test]
    async fn store_connects_once_before_any_worker_starts() {
        let events: EventLog = Arc::default();
        let connector = RecordingConnector::new(events.clone(), false);
        let (shutdown, _) = Shutdown::new();

        let started = start(
            valid_env(),
            &connector,
            |_, store| Ok(store),
            Arc::new(LoggingFactory),
            &shutdown,
        )
        .await
        .unwrap();
        assert_eq!(started.supervisor.running().len(), 11);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = events.lock().clone();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(log[0], "connect");
        assert_eq!(log.iter().filter(|e| *e == "connect").count(), 1);
        assert_eq!(log.iter().filter(|e| e.starts_with("start:")).count(), 11);
        assert!(log.contains(&"start:creator-10".to_string()));
        assert_eq!(started.config.webhook_url(), "https://bot.example/123:abc");

        started.supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn missing_token_never_touches_the_store() {
        let events: EventLog = Arc::default();
        let connector = RecordingConnector::new(events.clone(), false);
        let (shutdown, _) = Shutdown::new();

        let result = start(
            env(&[("EXTERNAL_URL", "https://bot.example")]),
            &connector,
            |_, store| Ok(store),
            Arc::new(LoggingFactory),
            &shutdown,
        )
        .await;

        assert!(matches!(
            result,
            Err(BootstrapError::Config(ConfigError::Missing("TOKEN")))
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn store_failure_launches_no_workers() {
        let events: EventLog = Arc::default();
        let connector = RecordingConnector::new(events.clone(), true);
        let (shutdown, _) = Shutdown::new();

        let result = start(
            valid_env(),
            &connector,
            |_, store| Ok(store),
            Arc::new(LoggingFactory),
            &shutdown,
        )
        .await;

        assert!(matches!(result, Err(BootstrapError::Store(_))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(events.lock().is_empty());
    }
}
