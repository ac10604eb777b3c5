pub mod pipeline;
pub mod registration;
pub mod types;
pub mod utils;

pub use pipeline::{resolve_bot_username, TelegramPipeline, UpdatePipeline};
pub use registration::register_webhook;
