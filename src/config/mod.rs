pub mod env;
mod loader;

pub use env::{AppConfig, ConfigError, DirectoryConfig, LoggingConfig, StoreConfig, WebhookMode};
pub use loader::env_lookup;
