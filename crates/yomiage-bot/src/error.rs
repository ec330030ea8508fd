use thiserror::Error;

/// Failures that stop a running bot.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("discord client error: {0}")]
    Client(#[from] serenity::Error),
}
