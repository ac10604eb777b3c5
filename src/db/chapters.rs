use anyhow::Result;
use sqlx::{query, query_as, sqlite::SqlitePool};

use crate::domain::{ChapterJob, CreatedChapter, JobStatus, QueueStats};

/// Chapter creation queue shared by all creator workers.
#[derive(Clone)]
pub struct ChapterQueue {
    pool: SqlitePool,
}

impl ChapterQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns `false` if the chapter was already queued.
    pub async fn enqueue(&self, manga_id: i64, chapter: i64) -> Result<bool> {
        let affected =
            query(r#"INSERT OR IGNORE INTO chapter_jobs (manga_id, chapter) VALUES (?1, ?2)"#)
                .bind(manga_id)
                .bind(chapter)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected > 0)
    }

    /// Atomically moves the oldest pending job to `running` for `worker`.
    pub async fn claim_next(&self, worker: u32) -> Result<Option<ChapterJob>> {
        let row: Option<(i64, i64, i64, i64)> = query_as(
            r#"UPDATE chapter_jobs
               SET status = 'running', worker = ?1, attempts = attempts + 1
               WHERE id = (
                   SELECT id FROM chapter_jobs WHERE status = 'pending' ORDER BY id LIMIT 1
               )
               RETURNING id, manga_id, chapter, attempts"#,
        )
        .bind(worker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, manga_id, chapter, attempts)| ChapterJob {
            id,
            manga_id,
            chapter,
            attempts,
        }))
    }

    pub async fn complete(&self, job: &ChapterJob, worker: u32, created: &CreatedChapter) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        query(
            r#"INSERT OR REPLACE INTO chapters (manga_id, chapter, title, page_count, created_by)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(job.manga_id)
        .bind(job.chapter)
        .bind(created.title.as_deref())
        .bind(created.page_count)
        .bind(worker)
        .execute(&mut *tx)
        .await?;
        query(
            r#"UPDATE chapter_jobs SET status = 'done', last_error = NULL,
               finished_at = CURRENT_TIMESTAMP WHERE id = ?1"#,
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Puts the job back to `pending`, or `failed` once `max_attempts` is spent.
    pub async fn fail(&self, job: &ChapterJob, error: &str, max_attempts: u32) -> Result<JobStatus> {
        let (status,): (String,) = query_as(
            r#"UPDATE chapter_jobs
               SET status = CASE WHEN attempts >= ?3 THEN 'failed' ELSE 'pending' END,
                   worker = NULL,
                   last_error = ?2,
                   finished_at = CASE WHEN attempts >= ?3 THEN CURRENT_TIMESTAMP ELSE NULL END
               WHERE id = ?1
               RETURNING status"#,
        )
        .bind(job.id)
        .bind(error)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;
        JobStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unexpected job status {status:?}"))
    }

    /// Releases jobs a worker claimed but never settled. Jobs whose attempts
    /// are spent become `failed` instead.
    pub async fn requeue_for_worker(&self, worker: u32, max_attempts: u32) -> Result<u64> {
        let affected = query(
            r#"UPDATE chapter_jobs
               SET status = CASE WHEN attempts >= ?2 THEN 'failed' ELSE 'pending' END,
                   worker = NULL,
                   last_error = COALESCE(last_error, 'worker interrupted'),
                   finished_at = CASE WHEN attempts >= ?2 THEN CURRENT_TIMESTAMP ELSE NULL END
               WHERE status = 'running' AND worker = ?1"#,
        )
        .bind(worker)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let affected = query(
            r#"UPDATE chapter_jobs SET status = 'pending', worker = NULL WHERE status = 'running'"#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            query_as(r#"SELECT status, COUNT(*) FROM chapter_jobs GROUP BY status"#)
                .fetch_all(&self.pool)
                .await?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Done) => stats.done = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) async fn status_of(&self, manga_id: i64, chapter: i64) -> Result<Option<JobStatus>> {
        let row: Option<(String,)> =
            query_as(r#"SELECT status FROM chapter_jobs WHERE manga_id = ?1 AND chapter = ?2"#)
                .bind(manga_id)
                .bind(chapter)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(status,)| JobStatus::parse(&status)))
    }
}
