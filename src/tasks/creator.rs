use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::BoxFuture;

use crate::{
    db::Database,
    domain::{ChapterJob, JobStatus},
    infrastructure::notifier::ChapterNotifier,
    tasks::source::ChapterBuilder,
};

use super::supervisor::{Tick, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Created,
    Retrying,
    Failed,
}

pub struct ChapterCreator {
    index: u32,
    store: Database,
    builder: Arc<dyn ChapterBuilder>,
    notifier: Arc<dyn ChapterNotifier>,
    idle: Duration,
    max_attempts: u32,
    // Whether claims left behind by an earlier instance of this worker
    // have been released.
    recovered: bool,
}

impl ChapterCreator {
    pub fn new(
        index: u32,
        store: Database,
        builder: Arc<dyn ChapterBuilder>,
        notifier: Arc<dyn ChapterNotifier>,
        idle: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            index,
            store,
            builder,
            notifier,
            idle,
            max_attempts,
            recovered: false,
        }
    }

    pub async fn process(&self, job: &ChapterJob) -> Result<JobOutcome> {
        let queue = self.store.chapters();
        let Some(manga) = self.store.manga().get(job.manga_id).await? else {
            queue.fail(job, "manga no longer tracked", 1).await?;
            return Ok(JobOutcome::Failed);
        };

        match self.builder.build(&manga, job.chapter).await {
            Ok(created) => {
                // Resolved before completing so a done chapter always has its
                // recipients.
                let subscribers = self.store.subscriptions().subscribers(manga.id).await?;
                queue.complete(job, self.index, &created).await?;
                tracing::info!(
                    target: "creator",
                    worker = self.index,
                    manga_id = manga.id,
                    chapter = job.chapter,
                    pages = created.page_count,
                    "chapter created"
                );
                self.notifier
                    .chapter_ready(&subscribers, &manga, job.chapter, &created)
                    .await;
                Ok(JobOutcome::Created)
            }
            Err(err) => {
                let status = queue.fail(job, &format!("{err:#}"), self.max_attempts).await?;
                tracing::warn!(
                    target: "creator",
                    worker = self.index,
                    manga_id = manga.id,
                    chapter = job.chapter,
                    attempts = job.attempts,
                    status = status.as_str(),
                    error = %err,
                    "chapter creation failed"
                );
                Ok(match status {
                    JobStatus::Failed => JobOutcome::Failed,
                    _ => JobOutcome::Retrying,
                })
            }
        }
    }
}

impl Worker for ChapterCreator {
    fn tick(&mut self) -> BoxFuture<'_, Result<Tick>> {
        Box::pin(async move {
            let queue = self.store.chapters();
            if !self.recovered {
                let released = queue.requeue_for_worker(self.index, self.max_attempts).await?;
                if released > 0 {
                    tracing::warn!(
                        target: "creator",
                        worker = self.index,
                        released,
                        "released chapter jobs left running by this worker"
                    );
                }
                self.recovered = true;
            }

            let Some(job) = queue.claim_next(self.index).await? else {
                return Ok(Tick::Idle(self.idle));
            };
            let outcome = self.process(&job).await;
            match outcome {
                Ok(_) => Ok(Tick::Busy),
                Err(err) => {
                    // If settling fails too, the next tick releases the claim.
                    self.recovered = false;
                    queue.fail(&job, &format!("{err:#}"), self.max_attempts).await?;
                    self.recovered = true;
                    Err(err)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use anyhow::anyhow;
    use futures::FutureExt;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        db::test_database,
        domain::{CreatedChapter, Manga},
    };

    struct FixedBuilder {
        pages: Option<i64>,
    }

    impl ChapterBuilder for FixedBuilder {
        fn build<'a>(
            &'a self,
            _manga: &'a Manga,
            chapter: i64,
        ) -> BoxFuture<'a, Result<CreatedChapter>> {
            let result = match self.pages {
                Some(page_count) => Ok(CreatedChapter {
                    title: Some(format!("Chapter {chapter}")),
                    page_count,
                }),
                None => Err(anyhow!("pages not published")),
            };
            Box::pin(async move { result })
        }
    }

    struct PanickingBuilder;

    impl ChapterBuilder for PanickingBuilder {
        fn build<'a>(
            &'a self,
            _manga: &'a Manga,
            _chapter: i64,
        ) -> BoxFuture<'a, Result<CreatedChapter>> {
            Box::pin(async { panic!("page decoder crashed") })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Vec<i64>, i64)>>,
    }

    impl ChapterNotifier for RecordingNotifier {
        fn chapter_ready<'a>(
            &'a self,
            chat_ids: &'a [i64],
            _manga: &'a Manga,
            chapter: i64,
            _created: &'a CreatedChapter,
        ) -> BoxFuture<'a, ()> {
            self.sent.lock().push((chat_ids.to_vec(), chapter));
            Box::pin(async {})
        }
    }

    fn creator(db: &Database, pages: Option<i64>, notifier: Arc<RecordingNotifier>) -> ChapterCreator {
        ChapterCreator::new(
            2,
            db.clone(),
            Arc::new(FixedBuilder { pages }),
            notifier,
            Duration::from_millis(500),
            2,
        )
    }

    #[tokio::test]
    async fn idle_when_queue_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(&dir).await;
        let mut worker = creator(&db, Some(10), Arc::default());
        assert_eq!(worker.tick().await.unwrap(), Tick::Idle(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn created_chapter_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(&dir).await;
        let manga = db.manga().track("Homunculus", "https://feed.example/h").await.unwrap();
        db.subscriptions().subscribe(-5, manga.id).await.unwrap();
        db.subscriptions().subscribe(9, manga.id).await.unwrap();
        db.chapters().enqueue(manga.id, 4).await.unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let mut worker = creator(&db, Some(22), notifier.clone());
        assert_eq!(worker.tick().await.unwrap(), Tick::Busy);

        assert_eq!(
            db.chapters().status_of(manga.id, 4).await.unwrap(),
            Some(JobStatus::Done)
        );
        assert_eq!(*notifier.sent.lock(), vec![(vec![-5, 9], 4)]);
    }

    #[tokio::test]
    async fn builder_errors_retry_then_fail() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(&dir).await;
        let manga = db.manga().track("Claymore", "https://feed.example/c").await.unwrap();
        db.chapters().enqueue(manga.id, 1).await.unwrap();
        let worker = creator(&db, None, Arc::default());

        let job = db.chapters().claim_next(2).await.unwrap().unwrap();
        assert_eq!(worker.process(&job).await.unwrap(), JobOutcome::Retrying);
        let job = db.chapters().claim_next(2).await.unwrap().unwrap();
        assert_eq!(worker.process(&job).await.unwrap(), JobOutcome::Failed);
        assert_eq!(
            db.chapters().status_of(manga.id, 1).await.unwrap(),
            Some(JobStatus::Failed)
        );
    }

    #[tokio::test]
    async fn rebuilt_creator_reclaims_job_left_by_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(&dir).await;
        let manga = db.manga().track("Berserk", "https://feed.example/b").await.unwrap();
        db.chapters().enqueue(manga.id, 1).await.unwrap();

        let mut crashing = ChapterCreator::new(
            2,
            db.clone(),
            Arc::new(PanickingBuilder),
            Arc::new(RecordingNotifier::default()),
            Duration::from_millis(1),
            3,
        );
        assert!(AssertUnwindSafe(crashing.tick()).catch_unwind().await.is_err());
        assert_eq!(
            db.chapters().status_of(manga.id, 1).await.unwrap(),
            Some(JobStatus::Running)
        );

        let notifier = Arc::new(RecordingNotifier::default());
        let mut rebuilt = creator(&db, Some(12), notifier.clone());
        assert_eq!(rebuilt.tick().await.unwrap(), Tick::Busy);
        assert_eq!(
            db.chapters().status_of(manga.id, 1).await.unwrap(),
            Some(JobStatus::Done)
        );
        assert_eq!(db.chapters().stats().await.unwrap().running, 0);
    }

    #[tokio::test]
    async fn failed_processing_puts_the_claim_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(&dir).await;
        let manga = db.manga().track("Akira", "https://feed.example/a").await.unwrap();
        db.chapters().enqueue(manga.id, 7).await.unwrap();
        sqlx::query("DROP TABLE subscriptions")
            .execute(db.pool())
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let mut worker = creator(&db, Some(30), notifier.clone());
        assert!(worker.tick().await.is_err());

        assert_eq!(
            db.chapters().status_of(manga.id, 7).await.unwrap(),
            Some(JobStatus::Pending)
        );
        assert_eq!(db.chapters().stats().await.unwrap().done, 0);
        assert!(notifier.sent.lock().is_empty());
    }
}
