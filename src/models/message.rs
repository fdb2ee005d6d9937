pub type ChatId = i64;
pub type MessageId = i64;

/// Where replies for one inbound request go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversation {
    pub chat: ChatId,
    pub reply_to: Option<MessageId>,
}

impl Conversation {
    pub fn new(chat: ChatId) -> Self {
        Self { chat, reply_to: None }
    }

    pub fn replying_to(chat: ChatId, message: MessageId) -> Self {
        Self {
            chat,
            reply_to: Some(message),
        }
    }
}

/// A message the channel accepted; `text` is what was sent, so callers can skip no-op edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    #[default]
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub reply_to: Option<MessageId>,
    pub parse_mode: ParseMode,
    pub silent: bool,
    pub disable_preview: bool,
    pub buttons: Vec<Button>,
}

impl SendOptions {
    pub fn html() -> Self {
        Self {
            parse_mode: ParseMode::Html,
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, message: Option<MessageId>) -> Self {
        self.reply_to = message;
        self
    }

    /// Terminal-style output: no notification sound, no link previews.
    pub fn quiet(mut self) -> Self {
        self.silent = true;
        self.disable_preview = true;
        self
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_id: String,
    pub file_name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/name payload` text message.
    Command {
        sender: Sender,
        chat: ChatId,
        message_id: MessageId,
        name: String,
        payload: String,
    },
    Document {
        sender: Sender,
        chat: ChatId,
        message_id: MessageId,
        document: Document,
    },
    /// Inline button press; `message_id` is the message carrying the button.
    Callback {
        sender: Sender,
        chat: ChatId,
        message_id: Option<MessageId>,
        callback_id: String,
        data: String,
    },
}

impl InboundEvent {
    pub fn sender(&self) -> &Sender {
        match self {
            InboundEvent::Command { sender, .. }
            | InboundEvent::Document { sender, .. }
            | InboundEvent::Callback { sender, .. } => sender,
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            InboundEvent::Command { chat, .. }
            | InboundEvent::Document { chat, .. }
            | InboundEvent::Callback { chat, .. } => *chat,
        }
    }
}

/// Splits `/sh@my_bot ls -la` into `("sh", "ls -la")`. Returns `None` for non-command text.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, payload) = match rest.find(char::is_whitespace) {
        Some(index) => (&rest[..index], rest[index..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), payload.to_string()))
}
