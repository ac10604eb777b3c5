use anyhow::Result;
use sqlx::{
    query, query_as,
    sqlite::{SqlitePool, SqliteRow},
    FromRow, Row,
};

use crate::domain::Manga;

const MANGA_COLUMNS: &str = "id, title, feed_url, last_chapter, checked_at";

#[derive(Clone)]
pub struct MangaRepository {
    pool: SqlitePool,
}

impl MangaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the feed, or refreshes the title of an already tracked one.
    pub async fn track(&self, title: &str, feed_url: &str) -> Result<Manga> {
        let manga = query_as::<_, Manga>(&format!(
            r#"INSERT INTO manga (title, feed_url) VALUES (?1, ?2)
               ON CONFLICT(feed_url) DO UPDATE SET title = excluded.title
               RETURNING {MANGA_COLUMNS}"#
        ))
        .bind(title)
        .bind(feed_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(manga)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Manga>> {
        let manga = query_as::<_, Manga>(&format!(
            "SELECT {MANGA_COLUMNS} FROM manga WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(manga)
    }

    /// Manga with at least one subscriber; the watcher only polls these.
    pub async fn list_tracked(&self) -> Result<Vec<Manga>> {
        let rows = query_as::<_, Manga>(&format!(
            r#"SELECT {MANGA_COLUMNS} FROM manga m
               WHERE EXISTS (SELECT 1 FROM subscriptions s WHERE s.manga_id = m.id)
               ORDER BY id"#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn record_latest(&self, id: i64, chapter: i64) -> Result<()> {
        query(
            r#"UPDATE manga SET last_chapter = ?2, checked_at = CURRENT_TIMESTAMP WHERE id = ?1"#,
        )
        .bind(id)
        .bind(chapter)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_checked(&self, id: i64) -> Result<()> {
        query(r#"UPDATE manga SET checked_at = CURRENT_TIMESTAMP WHERE id = ?1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for Manga {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            feed_url: row.try_get("feed_url")?,
            last_chapter: row.try_get("last_chapter")?,
            checked_at: row.try_get("checked_at")?,
        })
    }
}
