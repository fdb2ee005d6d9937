use parking_lot::Mutex;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::models::message::{BotCommand, ChatId, MessageHandle, MessageId, SendOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send { chat: ChatId, text: String },
    Edit { message_id: MessageId, text: String },
    Delete { message_id: MessageId },
    Answer { callback_id: String },
    SetCommands { commands: Vec<String> },
}

/// In-memory channel that records every call and can fail on demand.
#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<Call>,
    next_id: MessageId,
    failing_sends: usize,
    failing_edits: usize,
    files: Vec<(String, Vec<u8>)>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` sends fail without being recorded.
    pub fn fail_sends(&self, count: usize) {
        self.state.lock().failing_sends = count;
    }

    pub fn fail_edits(&self, count: usize) {
        self.state.lock().failing_edits = count;
    }

    pub fn add_file(&self, file_id: &str, bytes: &[u8]) {
        self.state
            .lock()
            .files
            .push((file_id.to_string(), bytes.to_vec()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Channel for RecordingChannel {
    fn send(&self, chat: ChatId, text: &str, _options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let mut state = self.state.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(ChannelError::Rejected("send refused".into()));
        }
        state.next_id += 1;
        let message_id = state.next_id;
        state.calls.push(Call::Send {
            chat,
            text: text.to_string(),
        });
        Ok(MessageHandle {
            chat,
            message_id,
            text: text.to_string(),
        })
    }

    fn edit(&self, message: &MessageHandle, text: &str, _options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let mut state = self.state.lock();
        if state.failing_edits > 0 {
            state.failing_edits -= 1;
            return Err(ChannelError::Rejected("edit refused".into()));
        }
        state.calls.push(Call::Edit {
            message_id: message.message_id,
            text: text.to_string(),
        });
        Ok(MessageHandle {
            text: text.to_string(),
            ..message.clone()
        })
    }

    fn delete(&self, message: &MessageHandle) -> Result<(), ChannelError> {
        self.state.lock().calls.push(Call::Delete {
            message_id: message.message_id,
        });
        Ok(())
    }

    fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError> {
        self.state.lock().calls.push(Call::Answer {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }

    fn set_commands(&self, commands: &[BotCommand]) -> Result<(), ChannelError> {
        self.state.lock().calls.push(Call::SetCommands {
            commands: commands.iter().map(|c| c.command.clone()).collect(),
        });
        Ok(())
    }

    fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        self.state
            .lock()
            .files
            .iter()
            .find(|(id, _)| id == file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ChannelError::Rejected(format!("no file {}", file_id)))
    }
}
