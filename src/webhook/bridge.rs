use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::{
    domain::UpdateEnvelope, infrastructure::shutdown::ShutdownListener,
    telegram::UpdatePipeline,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("update queue is full")]
    Saturated,
    #[error("update pipeline is not running")]
    Closed,
}

/// Sending half, owned by the request-serving runtime.
#[derive(Clone, Debug)]
pub struct UpdateSender {
    inner: mpsc::Sender<UpdateEnvelope>,
}

/// Receiving half, drained on the cooperative runtime.
pub struct UpdateReceiver {
    inner: mpsc::Receiver<UpdateEnvelope>,
}

pub fn channel(capacity: usize) -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (UpdateSender { inner: tx }, UpdateReceiver { inner: rx })
}

impl UpdateSender {
    /// Never waits: a full queue is reported instead of stalling the request.
    pub fn forward(&self, update: UpdateEnvelope) -> Result<(), ForwardError> {
        self.inner.try_send(update).map_err(|err| match err {
            TrySendError::Full(_) => ForwardError::Saturated,
            TrySendError::Closed(_) => ForwardError::Closed,
        })
    }
}

impl UpdateReceiver {
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<UpdateEnvelope> {
        self.inner.try_recv().ok()
    }
}

/// Drains forwarded updates into the pipeline, one task per update.
///
/// On shutdown the channel is closed to new updates and whatever was already
/// acknowledged is still handed to the pipeline.
pub fn spawn_pump(
    mut receiver: UpdateReceiver,
    pipeline: Arc<dyn UpdatePipeline>,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                update = receiver.inner.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
                _ = shutdown.notified() => break,
            };
            dispatch(pipeline.as_ref(), update);
        }

        receiver.inner.close();
        let mut drained = 0usize;
        while let Some(update) = receiver.inner.recv().await {
            dispatch(pipeline.as_ref(), update);
            drained += 1;
        }
        tracing::info!(target: "webhook", drained, "update pump stopped");
    })
}

fn dispatch(pipeline: &dyn UpdatePipeline, update: UpdateEnvelope) {
    let update_id = update.update_id;
    let handling = AssertUnwindSafe(pipeline.handle(update)).catch_unwind();
    tokio::spawn(async move {
        if handling.await.is_err() {
            tracing::error!(target: "webhook", update_id, "update handler panicked");
        }
    });
}
