use anyhow::Result;
use sqlx::{query, query_as, sqlite::SqlitePool};

use crate::domain::Manga;

#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: SqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns `false` when the chat was already subscribed.
    pub async fn subscribe(&self, chat_id: i64, manga_id: i64) -> Result<bool> {
        let affected =
            query(r#"INSERT OR IGNORE INTO subscriptions (chat_id, manga_id) VALUES (?1, ?2)"#)
                .bind(chat_id)
                .bind(manga_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected > 0)
    }

    pub async fn unsubscribe(&self, chat_id: i64, manga_id: i64) -> Result<bool> {
        let affected = query(r#"DELETE FROM subscriptions WHERE chat_id = ?1 AND manga_id = ?2"#)
            .bind(chat_id)
            .bind(manga_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn for_chat(&self, chat_id: i64) -> Result<Vec<Manga>> {
        let rows = query_as::<_, Manga>(
            r#"SELECT m.id, m.title, m.feed_url, m.last_chapter, m.checked_at
               FROM manga m JOIN subscriptions s ON s.manga_id = m.id
               WHERE s.chat_id = ?1
               ORDER BY m.title"#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn subscribers(&self, manga_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            query_as(r#"SELECT chat_id FROM subscriptions WHERE manga_id = ?1 ORDER BY chat_id"#)
                .bind(manga_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(chat_id,)| chat_id).collect())
    }
}
