use tokio::sync::watch;

/// Process-wide cancellation signal shared by the server and every worker.
#[derive(Clone)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownListener) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, ShutdownListener { receiver })
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn trigger(&self, reason: &'static str) {
        let first = self.sender.send_if_modified(|triggered| {
            let changed = !*triggered;
            *triggered = true;
            changed
        });
        if first {
            tracing::info!(target: "lifecycle", reason, "shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

impl ShutdownListener {
    /// Resolves once shutdown has been triggered, or the sender is gone.
    pub async fn notified(&mut self) {
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

pub fn install_signal_handlers(shutdown: Shutdown) {
    let ctrlc = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.trigger("ctrl-c");
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let term = shutdown;
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::terminate()) {
                sig.recv().await;
                term.trigger("SIGTERM");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn listeners_observe_trigger() {
        let (shutdown, mut early) = Shutdown::new();
        let mut late = shutdown.subscribe();
        assert!(!early.is_triggered());

        shutdown.trigger("test");
        shutdown.trigger("again");
        tokio::time::timeout(Duration::from_secs(1), early.notified())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), late.notified())
            .await
            .unwrap();
        assert!(late.is_triggered());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn subscribing_after_trigger_sees_it() {
        let (shutdown, _) = Shutdown::new();
        shutdown.trigger("test");
        let mut listener = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), listener.notified())
            .await
            .unwrap();
    }
}
