use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::app::scripts::command_name;
use crate::app::BotContext;
use crate::channel::Channel;
use crate::error::{LaunchError, ScriptError};
use crate::manager::orchestrator::{TaskHandle, STOP_CALLBACK_PREFIX};
use crate::models::message::{
    Button, ChatId, Conversation, Document, InboundEvent, MessageHandle, MessageId, SendOptions,
};

const ACCESS_DENIED: &str = "Sorry, you can't access the bot.";
const SHELL_SCRIPT_MIME: &str = "application/x-shellscript";
const RUN_CALLBACK_PREFIX: &str = "run:";
const DELETE_CALLBACK_PREFIX: &str = "del:";

/// Turns inbound chat events into task launches, cancellations and replies.
#[derive(Clone)]
pub struct CommandRouter {
    ctx: Arc<BotContext>,
}

impl CommandRouter {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        CommandRouter { ctx }
    }

    pub fn context(&self) -> &Arc<BotContext> {
        &self.ctx
    }

    /// Handles one event. Returns the task it launched, if any.
    pub fn handle(&self, event: InboundEvent) -> Option<TaskHandle> {
        let username = event.sender().username.clone();
        debug!("check user: {:?}", username);
        if !self.ctx.config.is_allowed(username.as_deref()) {
            info!("denied {:?} (user id {})", username, event.sender().user_id);
            self.notify(event.chat(), ACCESS_DENIED, SendOptions::default());
            if let InboundEvent::Callback { callback_id, .. } = &event {
                self.answer(callback_id);
            }
            return None;
        }

        match event {
            InboundEvent::Command {
                chat,
                message_id,
                name,
                payload,
                ..
            } => self.on_command(Conversation::replying_to(chat, message_id), &name, &payload),
            InboundEvent::Document {
                chat,
                message_id,
                document,
                ..
            } => {
                self.on_document(Conversation::replying_to(chat, message_id), &document);
                None
            }
            InboundEvent::Callback {
                chat,
                message_id,
                callback_id,
                data,
                ..
            } => {
                let launched = self.on_callback(chat, message_id, &data);
                self.answer(&callback_id);
                launched
            }
        }
    }

    /// Publishes the command list (defaults plus one per script) to the channel.
    pub fn refresh_commands(&self) {
        let commands = self.ctx.scripts.commands();
        if let Err(e) = self.channel().set_commands(&commands) {
            warn!("set commands: {}", e);
        }
    }

    fn on_command(&self, conversation: Conversation, name: &str, payload: &str) -> Option<TaskHandle> {
        let chat = conversation.chat;
        let reply = SendOptions::default().reply_to(conversation.reply_to);
        match name {
            "start" => {
                self.hint(chat, "Hi! You can try:", "/sh ping example.com", None);
                None
            }
            "sh" => {
                info!("/sh {}", payload);
                let launched = self
                    .ctx
                    .orchestrator
                    .launch_shell(conversation, &self.ctx.config.shell, payload);
                self.launched_or_report(conversation, launched)
            }
            "ps" => {
                let tasks = self.ctx.orchestrator.list_tasks();
                if tasks.is_empty() {
                    self.notify(chat, "No running task.", SendOptions::default());
                }
                for task in tasks {
                    self.notify(chat, &task, SendOptions::default());
                }
                None
            }
            "stop" => {
                match payload.trim().parse() {
                    Ok(id) => {
                        if !self.ctx.orchestrator.cancel_task(id) {
                            self.notify(chat, "Task ID not found.", reply);
                        }
                    }
                    Err(_) => self.hint(
                        chat,
                        "Please input a task ID number.\nExample: ",
                        "/stop 233",
                        conversation.reply_to,
                    ),
                }
                None
            }
            "ls" => {
                match self.ctx.scripts.list() {
                    Ok(names) if names.is_empty() => {
                        self.notify(chat, "No script files.", SendOptions::default());
                    }
                    Ok(names) => {
                        for name in names {
                            self.send_script_message(chat, &name);
                        }
                    }
                    Err(e) => {
                        error!("ls: {}", e);
                        self.notify(chat, &format!("Can not list scripts: {}", e), SendOptions::default());
                    }
                }
                None
            }
            other => match self.ctx.scripts.find_by_command(other) {
                Some(script) => self.run_script(conversation, &script),
                None => {
                    debug!("unknown command /{}", other);
                    None
                }
            },
        }
    }

    fn on_callback(&self, chat: ChatId, message_id: Option<MessageId>, data: &str) -> Option<TaskHandle> {
        if let Some(id) = data.strip_prefix(STOP_CALLBACK_PREFIX) {
            match id.parse() {
                Ok(id) => {
                    self.ctx.orchestrator.cancel_task(id);
                }
                Err(e) => error!("stop button err: {} ({:?})", e, data),
            }
            None
        } else if let Some(script) = data.strip_prefix(RUN_CALLBACK_PREFIX) {
            info!("run file: {}", script);
            self.run_script(Conversation::new(chat), script)
        } else if let Some(script) = data.strip_prefix(DELETE_CALLBACK_PREFIX) {
            if let Err(e) = self.ctx.scripts.remove(script) {
                self.notify(chat, &format!("Delete file error: {}", e), SendOptions::default());
            }
            if let Some(message_id) = message_id {
                let listing = MessageHandle {
                    chat,
                    message_id,
                    text: String::new(),
                };
                if let Err(e) = self.channel().delete(&listing) {
                    self.notify(chat, &format!("Delete message error: {}", e), SendOptions::default());
                }
            }
            self.refresh_commands();
            None
        } else {
            warn!("unknown callback data {:?}", data);
            None
        }
    }

    fn on_document(&self, conversation: Conversation, document: &Document) {
        if document.mime_type.as_deref() != Some(SHELL_SCRIPT_MIME) {
            debug!("ignoring upload {} ({:?})", document.file_name, document.mime_type);
            return;
        }
        let chat = conversation.chat;
        let contents = match self.channel().download_file(&document.file_id) {
            Ok(contents) => contents,
            Err(e) => {
                self.notify(chat, &format!("Can not save the file! Error: {}", e), SendOptions::default());
                return;
            }
        };

        match self.ctx.scripts.save(&document.file_name, &contents) {
            Ok(_) => {
                self.refresh_commands();
                self.send_script_message(chat, &document.file_name);
                self.notify(chat, "New script added!", SendOptions::default());
            }
            Err(ScriptError::Syntax(message)) => {
                self.notify(chat, &message, SendOptions::default().reply_to(conversation.reply_to));
            }
            Err(e) => {
                self.notify(chat, &format!("Can not save the file! Error: {}", e), SendOptions::default());
            }
        }
    }

    fn run_script(&self, conversation: Conversation, script: &str) -> Option<TaskHandle> {
        let path = match self.ctx.scripts.path_of(script) {
            Ok(path) => path,
            Err(e) => {
                self.notify(conversation.chat, &e.to_string(), SendOptions::default());
                return None;
            }
        };
        let path = path.to_string_lossy();
        let shell = &self.ctx.config.shell;
        let launched = self.ctx.orchestrator.launch(
            conversation,
            &format!("{} {}", shell, path),
            shell,
            &[path.as_ref()],
        );
        self.launched_or_report(conversation, launched)
    }

    fn launched_or_report(
        &self,
        conversation: Conversation,
        launched: Result<TaskHandle, LaunchError>,
    ) -> Option<TaskHandle> {
        match launched {
            Ok(handle) => Some(handle),
            Err(LaunchError::EmptyCommand) => {
                self.hint(
                    conversation.chat,
                    "No command found.\nExample: ",
                    "/sh ping example.com",
                    conversation.reply_to,
                );
                None
            }
            Err(e) => {
                error!("launch: {}", e);
                self.notify(
                    conversation.chat,
                    &e.to_string(),
                    SendOptions::default().reply_to(conversation.reply_to),
                );
                None
            }
        }
    }

    fn send_script_message(&self, chat: ChatId, name: &str) {
        let options = SendOptions::html()
            .with_button(Button::new("🗑️Delete", format!("{}{}", DELETE_CALLBACK_PREFIX, name)))
            .with_button(Button::new("▶Run", format!("{}{}", RUN_CALLBACK_PREFIX, name)));
        self.ctx
            .orchestrator
            .delivery()
            .deliver(chat, name, "<pre>", "</pre>", &options);
        debug!("listed script /{}", command_name(name));
    }

    fn notify(&self, chat: ChatId, text: &str, options: SendOptions) {
        self.ctx.orchestrator.delivery().notify(chat, text, &options);
    }

    /// `lead` followed by `example` as a preformatted block.
    fn hint(&self, chat: ChatId, lead: &str, example: &str, reply_to: Option<MessageId>) {
        let options = SendOptions::html().reply_to(reply_to);
        self.ctx
            .orchestrator
            .delivery()
            .deliver(chat, example, &format!("{}<pre>", lead), "</pre>", &options);
    }

    fn answer(&self, callback_id: &str) {
        if let Err(e) = self.channel().answer_callback(callback_id) {
            error!("answer callback {}: {}", callback_id, e);
        }
    }

    fn channel(&self) -> &Arc<dyn Channel> {
        self.ctx.orchestrator.delivery().channel()
    }
}
