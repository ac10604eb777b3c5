use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::{CreatedChapter, Manga};

/// Where the watcher learns about new chapters.
pub trait UpdateSource: Send + Sync {
    fn latest_chapter<'a>(&'a self, manga: &'a Manga) -> BoxFuture<'a, Result<Option<i64>>>;
}

/// Produces the chapter record for one queued chapter.
pub trait ChapterBuilder: Send + Sync {
    fn build<'a>(&'a self, manga: &'a Manga, chapter: i64) -> BoxFuture<'a, Result<CreatedChapter>>;
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    latest_chapter: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    title: Option<String>,
    #[serde(default)]
    pages: Vec<String>,
}

/// JSON feed client: `GET <feed_url>` for the latest chapter and
/// `GET <feed_url>/chapters/<n>` for chapter details.
#[derive(Clone)]
pub struct FeedClient {
    http: Client,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("feed returned an error for {url}"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("unexpected feed payload from {url}"))
    }
}

impl UpdateSource for FeedClient {
    fn latest_chapter<'a>(&'a self, manga: &'a Manga) -> BoxFuture<'a, Result<Option<i64>>> {
        Box::pin(async move {
            let feed: FeedResponse = self.get_json(&manga.feed_url).await?;
            Ok(feed.latest_chapter)
        })
    }
}

impl ChapterBuilder for FeedClient {
    fn build<'a>(&'a self, manga: &'a Manga, chapter: i64) -> BoxFuture<'a, Result<CreatedChapter>> {
        Box::pin(async move {
            let url = chapter_url(&manga.feed_url, chapter);
            let details: ChapterResponse = self.get_json(&url).await?;
            anyhow::ensure!(!details.pages.is_empty(), "chapter {chapter} has no pages yet");
            Ok(CreatedChapter {
                title: details
                    .title
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
                page_count: details.pages.len() as i64,
            })
        })
    }
}

pub fn chapter_url(feed_url: &str, chapter: i64) -> String {
    format!("{}/chapters/{chapter}", feed_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_url_appends_to_feed() {
        assert_eq!(
            chapter_url("https://feed.example/berserk/", 374),
            "https://feed.example/berserk/chapters/374"
        );
    }

    #[test]
    fn chapter_payload_tolerates_missing_pages() {
        let parsed: ChapterResponse = serde_json::from_str(r#"{"title": null}"#).unwrap();
        assert!(parsed.pages.is_empty());
        let feed: FeedResponse = serde_json::from_str(r#"{"latest_chapter": 12}"#).unwrap();
        assert_eq!(feed.latest_chapter, Some(12));
    }
}
