pub mod console;
#[cfg(test)]
pub mod recording;
pub mod telegram;

use crate::error::ChannelError;
use crate::models::message::{BotCommand, ChatId, MessageHandle, SendOptions};

/// The chat service the bot talks through.
///
/// Every call may fail transiently; retry policy belongs to the delivery layer.
pub trait Channel: Send + Sync {
    fn send(&self, chat: ChatId, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError>;

    fn edit(&self, message: &MessageHandle, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError>;

    fn delete(&self, message: &MessageHandle) -> Result<(), ChannelError>;

    fn answer_callback(&self, _callback_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    fn set_commands(&self, _commands: &[BotCommand]) -> Result<(), ChannelError> {
        Ok(())
    }

    fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError>;
}
