pub mod manga;
pub mod update;
pub mod worker;

pub use manga::{ChapterJob, CreatedChapter, JobStatus, Manga, QueueStats};
pub use update::UpdateEnvelope;
pub use worker::WorkerDescriptor;
