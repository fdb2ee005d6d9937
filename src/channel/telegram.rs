use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::models::message::{
    parse_command, BotCommand, ChatId, Document, InboundEvent, MessageHandle, ParseMode,
    SendOptions, Sender,
};

const API_ROOT: &str = "https://api.telegram.org";

/// Telegram Bot API over blocking HTTP.
pub struct TelegramChannel {
    client: Client,
    token: String,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    callback_query: Option<TelegramCallback>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    document: Option<TelegramDocument>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramDocument {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallback {
    id: String,
    from: TelegramUser,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyParameters {
    message_id: i64,
    allow_sending_without_reply: bool,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<i64>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    disable_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_preview_options: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_parameters: Option<ReplyParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<serde_json::Value>,
}

impl<'a> MessagePayload<'a> {
    fn new(chat_id: ChatId, text: &'a str, options: &'a SendOptions) -> Self {
        let buttons: Vec<InlineButton<'_>> = options
            .buttons
            .iter()
            .map(|button| InlineButton {
                text: &button.label,
                callback_data: &button.data,
            })
            .collect();

        MessagePayload {
            chat_id,
            message_id: None,
            text,
            parse_mode: match options.parse_mode {
                ParseMode::Plain => None,
                ParseMode::Html => Some("HTML"),
            },
            disable_notification: options.silent,
            link_preview_options: options
                .disable_preview
                .then(|| json!({ "is_disabled": true })),
            reply_parameters: options.reply_to.map(|message_id| ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
            reply_markup: (!buttons.is_empty())
                .then(|| json!({ "inline_keyboard": [buttons] })),
        }
    }
}

impl TelegramChannel {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(TelegramChannel {
            client,
            token: token.to_string(),
            poll_timeout,
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, payload: &impl Serialize) -> Result<T, ChannelError> {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/bot{}/{}", API_ROOT, self.token, method))
            .json(payload)
            .send()?
            .json()?;
        if !response.ok {
            return Err(ChannelError::Api(format!(
                "{}: {}",
                method,
                response.description.unwrap_or_else(|| "ok=false".to_string())
            )));
        }
        response
            .result
            .ok_or_else(|| ChannelError::Api(format!("{}: empty result", method)))
    }

    /// Long-polls for updates after `offset`; returns the next offset and the decoded events.
    pub fn poll(&self, offset: Option<i64>) -> Result<(Option<i64>, Vec<InboundEvent>), ChannelError> {
        let mut payload = json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        let updates: Vec<Update> = self.call("getUpdates", &payload)?;
        let next = updates.iter().map(|u| u.update_id + 1).max().or(offset);
        Ok((next, updates.into_iter().filter_map(into_event).collect()))
    }
}

impl Channel for TelegramChannel {
    fn send(&self, chat: ChatId, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let sent: SentMessage = self.call("sendMessage", &MessagePayload::new(chat, text, options))?;
        Ok(MessageHandle {
            chat,
            message_id: sent.message_id,
            text: text.to_string(),
        })
    }

    fn edit(&self, message: &MessageHandle, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let mut payload = MessagePayload::new(message.chat, text, options);
        payload.message_id = Some(message.message_id);
        payload.reply_parameters = None;
        payload.disable_notification = false;
        let _: serde_json::Value = self.call("editMessageText", &payload)?;
        Ok(MessageHandle {
            text: text.to_string(),
            ..message.clone()
        })
    }

    fn delete(&self, message: &MessageHandle) -> Result<(), ChannelError> {
        let _: bool = self.call(
            "deleteMessage",
            &json!({ "chat_id": message.chat, "message_id": message.message_id }),
        )?;
        Ok(())
    }

    fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError> {
        let _: bool = self.call(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_id }),
        )?;
        Ok(())
    }

    fn set_commands(&self, commands: &[BotCommand]) -> Result<(), ChannelError> {
        let commands: Vec<_> = commands
            .iter()
            .map(|c| json!({ "command": c.command, "description": c.description }))
            .collect();
        let _: bool = self.call("setMyCommands", &json!({ "commands": commands }))?;
        Ok(())
    }

    fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let file: TelegramFile = self.call("getFile", &json!({ "file_id": file_id }))?;
        let path = file
            .file_path
            .ok_or_else(|| ChannelError::Api(format!("getFile: no path for {}", file_id)))?;
        debug!("downloading {}", path);
        let response = self
            .client
            .get(format!("{}/file/bot{}/{}", API_ROOT, self.token, path))
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

fn sender_of(user: &TelegramUser) -> Sender {
    Sender {
        user_id: user.id,
        username: user.username.clone(),
    }
}

fn into_event(update: Update) -> Option<InboundEvent> {
    if let Some(callback) = update.callback_query {
        let chat = callback
            .message
            .as_ref()
            .map_or(callback.from.id, |message| message.chat.id);
        return Some(InboundEvent::Callback {
            sender: sender_of(&callback.from),
            chat,
            message_id: callback.message.as_ref().map(|message| message.message_id),
            callback_id: callback.id,
            data: callback.data.unwrap_or_default(),
        });
    }

    let message = update.message?;
    let sender = sender_of(message.from.as_ref()?);
    if let Some(document) = message.document {
        return Some(InboundEvent::Document {
            sender,
            chat: message.chat.id,
            message_id: message.message_id,
            document: Document {
                file_name: document.file_name.unwrap_or_else(|| document.file_id.clone()),
                file_id: document.file_id,
                mime_type: document.mime_type,
            },
        });
    }

    let (name, payload) = parse_command(message.text.as_deref()?)?;
    Some(InboundEvent::Command {
        sender,
        chat: message.chat.id,
        message_id: message.message_id,
        name,
        payload,
    })
}
