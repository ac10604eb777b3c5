use futures::future::BoxFuture;
use teloxide::{prelude::*, types::ParseMode};

use crate::{
    domain::{CreatedChapter, Manga},
    telegram::utils::escape_html,
};

/// Tells subscribers that a chapter finished building.
pub trait ChapterNotifier: Send + Sync {
    fn chapter_ready<'a>(
        &'a self,
        chat_ids: &'a [i64],
        manga: &'a Manga,
        chapter: i64,
        created: &'a CreatedChapter,
    ) -> BoxFuture<'a, ()>;
}

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl ChapterNotifier for TelegramNotifier {
    fn chapter_ready<'a>(
        &'a self,
        chat_ids: &'a [i64],
        manga: &'a Manga,
        chapter: i64,
        created: &'a CreatedChapter,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let text = format_chapter_ready(manga, chapter, created);
            for &chat_id in chat_ids {
                if let Err(err) = self
                    .bot
                    .send_message(ChatId(chat_id), text.clone())
                    .parse_mode(ParseMode::Html)
                    .await
                {
                    tracing::warn!(
                        target: "telegram",
                        error = %err,
                        chat_id,
                        manga_id = manga.id,
                        chapter,
                        "failed to deliver chapter notification"
                    );
                }
            }
        })
    }
}

pub fn format_chapter_ready(manga: &Manga, chapter: i64, created: &CreatedChapter) -> String {
    let mut text = format!(
        "<b>{}</b>\nChapter {chapter} is ready ({} pages).",
        escape_html(&manga.title),
        created.page_count
    );
    if let Some(title) = created.title.as_deref() {
        text.push_str(&format!("\n<i>{}</i>", escape_html(title)));
    }
    text
}
