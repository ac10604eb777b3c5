use teloxide::utils::command::BotCommands;

pub type BotResult<T> = Result<T, teloxide::RequestError>;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "introduce the bot")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "follow a feed: /track <feed_url> <title>")]
    Track(String),
    #[command(description = "stop following: /untrack <id>")]
    Untrack(String),
    #[command(description = "list followed manga")]
    List,
    #[command(description = "chapter queue and worker health")]
    Status,
}
