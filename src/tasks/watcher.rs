use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::task::yield_now;

use crate::{db::Database, tasks::source::UpdateSource};

use super::supervisor::{Tick, Worker};

/// Upper bound on chapters queued for one manga in a single scan; the rest
/// are picked up by later scans.
pub const MAX_NEW_CHAPTERS_PER_SCAN: i64 = 50;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub checked: usize,
    pub enqueued: usize,
}

/// Polls every tracked feed and queues chapters newer than the last one seen.
pub struct UpdateWatcher {
    store: Database,
    source: Arc<dyn UpdateSource>,
    interval: Duration,
}

impl UpdateWatcher {
    pub fn new(store: Database, source: Arc<dyn UpdateSource>, interval: Duration) -> Self {
        Self {
            store,
            source,
            interval,
        }
    }

    pub async fn scan(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        for manga in self.store.manga().list_tracked().await? {
            report.checked += 1;
            let latest = match self.source.latest_chapter(&manga).await {
                Ok(latest) => latest,
                Err(err) => {
                    tracing::warn!(
                        target: "watcher",
                        manga_id = manga.id,
                        feed = %manga.feed_url,
                        error = %err,
                        "feed check failed"
                    );
                    continue;
                }
            };

            match (manga.last_chapter, latest) {
                (_, None) => self.store.manga().mark_checked(manga.id).await?,
                // First observation only sets the baseline.
                (None, Some(latest)) => {
                    self.store.manga().record_latest(manga.id, latest).await?;
                    tracing::info!(target: "watcher", manga_id = manga.id, latest, "baseline recorded");
                }
                (Some(known), Some(latest)) if latest > known => {
                    let upto = latest.min(known.saturating_add(MAX_NEW_CHAPTERS_PER_SCAN));
                    let queue = self.store.chapters();
                    for chapter in (known + 1)..=upto {
                        if queue.enqueue(manga.id, chapter).await? {
                            report.enqueued += 1;
                        }
                    }
                    self.store.manga().record_latest(manga.id, upto).await?;
                    tracing::info!(
                        target: "watcher",
                        manga_id = manga.id,
                        title = %manga.title,
                        from = known + 1,
                        to = upto,
                        behind = latest - upto,
                        "new chapters queued"
                    );
                }
                (Some(_), Some(_)) => self.store.manga().mark_checked(manga.id).await?,
            }
            yield_now().await;
        }
        Ok(report)
    }
}

impl Worker for UpdateWatcher {
    fn tick(&mut self) -> BoxFuture<'_, Result<Tick>> {
        Box::pin(async move {
            let report = self.scan().await?;
            tracing::debug!(
                target: "watcher",
                checked = report.checked,
                enqueued = report.enqueued,
                "scan finished"
            );
            Ok(Tick::Idle(self.interval))
        })
    }
}
