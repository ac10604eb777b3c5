pub mod creator;
pub mod source;
pub mod supervisor;
pub mod watcher;

use std::sync::Arc;

use crate::{
    context::AppContext, domain::WorkerDescriptor, infrastructure::notifier::TelegramNotifier,
};

use creator::ChapterCreator;
use source::FeedClient;
use supervisor::{Worker, WorkerFactory};
use watcher::UpdateWatcher;

/// Production worker set: the feed watcher and the chapter creators.
pub struct MangaWorkers;

impl WorkerFactory<AppContext> for MangaWorkers {
    fn build(&self, descriptor: WorkerDescriptor, context: &AppContext) -> Box<dyn Worker> {
        let workers = &context.config.workers;
        let feeds = Arc::new(FeedClient::new(context.http.clone(), workers.fetch_timeout));
        match descriptor {
            WorkerDescriptor::Watcher => Box::new(UpdateWatcher::new(
                context.store.clone(),
                feeds,
                workers.watch_interval,
            )),
            WorkerDescriptor::Creator { index } => Box::new(ChapterCreator::new(
                index,
                context.store.clone(),
                feeds,
                Arc::new(TelegramNotifier::new(context.bot.clone())),
                workers.creator_idle,
                workers.chapter_max_attempts,
            )),
        }
    }
}
