use std::{any::Any, collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    task::{yield_now, JoinHandle},
    time::{sleep, timeout, Instant},
};

use crate::{
    domain::WorkerDescriptor,
    infrastructure::shutdown::{Shutdown, ShutdownListener},
};

/// What a worker wants after one iteration of its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// More work is likely available; yield and run again.
    Busy,
    /// Nothing to do; sleep before the next iteration.
    Idle(Duration),
}

/// One long-running background task, driven one iteration at a time.
pub trait Worker: Send {
    fn tick(&mut self) -> BoxFuture<'_, anyhow::Result<Tick>>;
}

/// Builds workers from the shared context. Also used to rebuild a worker after
/// it panicked.
pub trait WorkerFactory<C>: Send + Sync {
    fn build(&self, descriptor: WorkerDescriptor, context: &C) -> Box<dyn Worker>;
}

#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("{worker} iteration failed: {error:#}")]
    Failed {
        worker: WorkerDescriptor,
        error: anyhow::Error,
    },
    #[error("{worker} panicked: {message}")]
    Panicked {
        worker: WorkerDescriptor,
        message: String,
    },
}

/// Backoff applied after a faulted iteration before the loop restarts.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RestartPolicy {
    pub fn delay(&self, consecutive_faults: u32) -> Duration {
        let exponent = consecutive_faults.saturating_sub(1).min(16);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max.max(self.base))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub ticks: u64,
    pub faults: u64,
    pub last_fault: Option<(DateTime<Utc>, String)>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Starting,
            ticks: 0,
            faults: 0,
            last_fault: None,
        }
    }
}

pub type StatusProvider = Arc<dyn Fn() -> Vec<(WorkerDescriptor, WorkerStatus)> + Send + Sync>;

#[derive(Clone, Default)]
struct StatusRegistry {
    inner: Arc<Mutex<BTreeMap<WorkerDescriptor, WorkerStatus>>>,
}

impl StatusRegistry {
    fn update(&self, descriptor: WorkerDescriptor, apply: impl FnOnce(&mut WorkerStatus)) {
        let mut guard = self.inner.lock();
        apply(guard.entry(descriptor).or_default());
    }

    fn snapshot(&self) -> Vec<(WorkerDescriptor, WorkerStatus)> {
        self.inner
            .lock()
            .iter()
            .map(|(descriptor, status)| (*descriptor, status.clone()))
            .collect()
    }
}

struct SupervisedWorker {
    descriptor: WorkerDescriptor,
    handle: JoinHandle<()>,
}

pub struct SupervisorHandle {
    workers: Vec<SupervisedWorker>,
    registry: StatusRegistry,
    shutdown: Shutdown,
}

/// Schedules every descriptor as its own task on the current runtime and
/// returns without waiting for any of them.
pub fn launch<C>(
    context: &C,
    descriptors: &[WorkerDescriptor],
    factory: Arc<dyn WorkerFactory<C>>,
    policy: RestartPolicy,
    shutdown: &Shutdown,
) -> SupervisorHandle
where
    C: Clone + Send + Sync + 'static,
{
    let registry = StatusRegistry::default();
    let workers = descriptors
        .iter()
        .map(|&descriptor| {
            registry.update(descriptor, |_| {});
            let handle = tokio::spawn(supervise(
                descriptor,
                context.clone(),
                factory.clone(),
                policy,
                shutdown.subscribe(),
                registry.clone(),
            ));
            SupervisedWorker { descriptor, handle }
        })
        .collect::<Vec<_>>();

    tracing::info!(
        target: "supervisor",
        workers = workers.len(),
        creators = descriptors.iter().filter(|d| d.is_creator()).count(),
        "background workers scheduled"
    );

    SupervisorHandle {
        workers,
        registry,
        shutdown: shutdown.clone(),
    }
}

impl SupervisorHandle {
    /// Descriptors whose task has not finished.
    pub fn running(&self) -> Vec<WorkerDescriptor> {
        self.workers
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .map(|worker| worker.descriptor)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn abort(&self, descriptor: WorkerDescriptor) -> bool {
        match self.workers.iter().find(|w| w.descriptor == descriptor) {
            Some(worker) => {
                worker.handle.abort();
                tracing::warn!(target: "supervisor", worker = %descriptor, "worker aborted");
                true
            }
            None => false,
        }
    }

    pub fn statuses(&self) -> Vec<(WorkerDescriptor, WorkerStatus)> {
        self.registry.snapshot()
    }

    pub fn status_provider(&self) -> StatusProvider {
        let registry = self.registry.clone();
        Arc::new(move || registry.snapshot())
    }

    /// Signals cancellation and waits up to `grace` for every worker, aborting
    /// the ones that are still running afterwards.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.trigger("supervisor shutdown");
        let deadline = Instant::now() + grace;
        for worker in self.workers {
            let SupervisedWorker { descriptor, mut handle } = worker;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_cancelled() => {}
                Ok(Err(err)) => {
                    tracing::error!(target: "supervisor", worker = %descriptor, error = %err, "worker task ended abnormally");
                }
                Err(_) => {
                    tracing::warn!(
                        target: "supervisor",
                        worker = %descriptor,
                        "worker did not stop within {:?}; aborting",
                        grace
                    );
                    handle.abort();
                }
            }
        }
    }
}

async fn supervise<C>(
    descriptor: WorkerDescriptor,
    context: C,
    factory: Arc<dyn WorkerFactory<C>>,
    policy: RestartPolicy,
    mut shutdown: ShutdownListener,
    registry: StatusRegistry,
) where
    C: Clone + Send + Sync + 'static,
{
    tracing::info!(target: "supervisor", worker = %descriptor, "worker started");
    let mut worker = factory.build(descriptor, &context);
    let mut consecutive_faults = 0u32;

    loop {
        if shutdown.is_triggered() {
            break;
        }
        registry.update(descriptor, |status| status.state = WorkerState::Running);

        let outcome = AssertUnwindSafe(worker.tick()).catch_unwind().await;
        let fault = match outcome {
            Ok(Ok(tick)) => {
                consecutive_faults = 0;
                registry.update(descriptor, |status| status.ticks += 1);
                let pause = match tick {
                    Tick::Busy => {
                        yield_now().await;
                        continue;
                    }
                    Tick::Idle(pause) => pause,
                };
                tokio::select! {
                    _ = sleep(pause) => {}
                    _ = shutdown.notified() => break,
                }
                continue;
            }
            Ok(Err(error)) => WorkerFault::Failed {
                worker: descriptor,
                error,
            },
            Err(payload) => {
                // Transient state may be half-updated; start from a fresh worker.
                worker = factory.build(descriptor, &context);
                WorkerFault::Panicked {
                    worker: descriptor,
                    message: panic_message(payload.as_ref()),
                }
            }
        };

        consecutive_faults = consecutive_faults.saturating_add(1);
        let backoff = policy.delay(consecutive_faults);
        tracing::error!(
            target: "supervisor",
            worker = %descriptor,
            consecutive_faults,
            backoff_ms = backoff.as_millis() as u64,
            error = %fault,
            "worker fault; restarting iteration after backoff"
        );
        registry.update(descriptor, |status| {
            status.state = WorkerState::Backoff;
            status.faults += 1;
            status.last_fault = Some((Utc::now(), fault.to_string()));
        });

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown.notified() => break,
        }
    }

    registry.update(descriptor, |status| status.state = WorkerState::Stopped);
    tracing::info!(target: "supervisor", worker = %descriptor, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
