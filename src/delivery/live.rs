use std::io;
use std::time::Instant;

use crossbeam_channel::{never, select, Receiver};
use log::{debug, warn};

use crate::delivery::{compose, Delivery};
use crate::error::ExitError;
use crate::models::message::{ChatId, MessageHandle, SendOptions};
use crate::terminal::format_terminal;
use crate::worker::buffer::OutputBuffer;
use crate::worker::capture::TaskOutcome;

const PLACEHOLDER: &str = "...";

/// How a task's output is presented while it runs and once it is done.
#[derive(Debug, Clone)]
pub struct LiveView {
    pub chat: ChatId,
    pub prefix: String,
    pub suffix: String,
    pub live_options: SendOptions,
    pub final_options: SendOptions,
}

#[derive(Debug)]
pub enum LiveEnd {
    Finished(TaskOutcome),
    Cancelled,
}

struct LiveMessage<'a> {
    delivery: &'a Delivery,
    view: &'a LiveView,
    current: Option<MessageHandle>,
}

impl<'a> LiveMessage<'a> {
    fn new(delivery: &'a Delivery, view: &'a LiveView) -> Self {
        LiveMessage {
            delivery,
            view,
            current: None,
        }
    }

    fn refresh(&mut self, output: &OutputBuffer) {
        let view = self.view;
        let mut body = format_terminal(&output.snapshot());
        if body.is_empty() {
            body = PLACEHOLDER.to_string();
        }
        let body = tail(&body, self.delivery.body_limit(&view.prefix, &view.suffix));
        let text = compose(&view.prefix, body, &view.suffix, view.live_options.parse_mode);

        let channel = self.delivery.channel();
        match &self.current {
            None => match channel.send(view.chat, &text, &view.live_options) {
                Ok(handle) => self.current = Some(handle),
                Err(e) => warn!("send terminal err: {}", e),
            },
            Some(message) if message.text != text => {
                match channel.edit(message, &text, &view.live_options) {
                    Ok(handle) => self.current = Some(handle),
                    Err(e) => debug!("edit terminal err: {}", e),
                }
            }
            Some(_) => {}
        }
    }

    fn retire(self) {
        if let Some(message) = self.current {
            if let Err(e) = self.delivery.channel().delete(&message) {
                warn!("delete terminal messages err: {}", e);
            }
        }
    }
}

fn tail(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - limit)
        .map_or(text.len(), |(index, _)| index);
    &text[start..]
}

impl Delivery {
    /// Keeps one message showing the tail of `output` until `done` fires or `cancel`
    /// becomes ready, then replaces it with the full output.
    pub fn live_update(
        &self,
        view: &LiveView,
        output: &OutputBuffer,
        ticks: &Receiver<Instant>,
        done: &Receiver<TaskOutcome>,
        cancel: &Receiver<()>,
    ) -> LiveEnd {
        let mut live = LiveMessage::new(self, view);
        let mut ticks = ticks.clone();

        let end = loop {
            select! {
                recv(ticks) -> tick => match tick {
                    Ok(_) => live.refresh(output),
                    Err(_) => ticks = never(),
                },
                recv(done) -> outcome => {
                    break LiveEnd::Finished(outcome.unwrap_or_else(|_| {
                        Err(ExitError::Wait(io::Error::other("done signal lost")))
                    }));
                }
                recv(cancel) -> _ => break LiveEnd::Cancelled,
            }
        };
        live.retire();

        let full = format_terminal(&output.snapshot());
        self.deliver(view.chat, &full, &view.prefix, &view.suffix, &view.final_options);
        if let LiveEnd::Finished(Err(e)) = &end {
            self.deliver(view.chat, &e.to_string(), &view.prefix, &view.suffix, &view.final_options);
        }
        end
    }
}
