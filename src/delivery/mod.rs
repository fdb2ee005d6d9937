//! Getting text to the channel: chunked sends with retry, and live-updated messages.

pub mod live;
pub mod split;

use std::sync::Arc;
use std::thread;

use log::{error, warn};

use crate::channel::Channel;
use crate::config::DeliveryConfig;
use crate::models::message::{ChatId, MessageHandle, ParseMode, SendOptions};

pub use live::{LiveEnd, LiveView};
pub use split::split_by_lines;

const UNDELIVERED_NOTICE: &str =
    "Messages not sent. Please check your terminal log. It may not be an issue with networking.";

pub struct Delivery {
    channel: Arc<dyn Channel>,
    settings: DeliveryConfig,
}

impl Delivery {
    pub fn new(channel: Arc<dyn Channel>, settings: DeliveryConfig) -> Self {
        Delivery { channel, settings }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// A chunk that runs out of retries is dropped after one notice; later chunks still go.
    pub fn deliver(
        &self,
        chat: ChatId,
        text: &str,
        prefix: &str,
        suffix: &str,
        options: &SendOptions,
    ) -> Vec<MessageHandle> {
        let limit = self.body_limit(prefix, suffix);
        split_by_lines(text, limit)
            .iter()
            .filter_map(|chunk| {
                let message = compose(prefix, chunk, suffix, options.parse_mode);
                self.send_with_retry(chat, &message, options)
            })
            .collect()
    }

    pub fn notify(&self, chat: ChatId, text: &str, options: &SendOptions) -> Option<MessageHandle> {
        self.deliver(chat, text, "", "", options).pop()
    }

    fn send_with_retry(&self, chat: ChatId, message: &str, options: &SendOptions) -> Option<MessageHandle> {
        let mut attempts = 0;
        loop {
            match self.channel.send(chat, message, options) {
                Ok(handle) => return Some(handle),
                Err(e) => {
                    attempts += 1;
                    warn!("send message => err: {}; attempt {}/{}", e, attempts, self.settings.max_send_retry);
                    if attempts >= self.settings.max_send_retry {
                        error!("Max retry {} times. {}", self.settings.max_send_retry, UNDELIVERED_NOTICE);
                        let notice_options = SendOptions::default().reply_to(options.reply_to);
                        if let Err(e) = self.channel.send(chat, UNDELIVERED_NOTICE, &notice_options) {
                            error!("last signal err: {}", e);
                        }
                        return None;
                    }
                    let delay = self.settings.retry_delay();
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }

    fn body_limit(&self, prefix: &str, suffix: &str) -> usize {
        let surround = prefix.chars().count() + suffix.chars().count();
        self.settings.max_message_len.saturating_sub(surround).max(1)
    }
}

fn compose(prefix: &str, body: &str, suffix: &str, parse_mode: ParseMode) -> String {
    match parse_mode {
        ParseMode::Plain => format!("{}{}{}", prefix, body, suffix),
        ParseMode::Html => format!("{}{}{}", prefix, escape_html(body), suffix),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
