use std::io::{self, Write};
use std::sync::LazyLock;

use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{self, ClearType},
};
use parking_lot::Mutex;
use regex::Regex;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::models::message::{ChatId, MessageHandle, MessageId, ParseMode, SendOptions};

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("HTML tag pattern is valid"));

/// Shows bot messages in the local terminal.
///
/// Only the most recently drawn message can be redrawn in place; edits of older
/// messages are printed again below.
pub struct ConsoleChannel<W: Write + Send> {
    inner: Mutex<ConsoleState<W>>,
}

struct ConsoleState<W> {
    out: W,
    width: Option<u16>,
    next_id: MessageId,
    last_drawn: Option<(MessageId, u16)>,
}

impl ConsoleChannel<io::Stdout> {
    pub fn stdout() -> Self {
        let width = terminal::size().ok().map(|(columns, _)| columns);
        Self::new(io::stdout(), width)
    }
}

impl<W: Write + Send> ConsoleChannel<W> {
    pub fn new(out: W, width: Option<u16>) -> Self {
        ConsoleChannel {
            inner: Mutex::new(ConsoleState {
                out,
                width,
                next_id: 1,
                last_drawn: None,
            }),
        }
    }

    #[cfg(test)]
    fn with_output<R>(&self, read: impl FnOnce(&W) -> R) -> R {
        read(&self.inner.lock().out)
    }
}

impl<W: Write> ConsoleState<W> {
    fn draw(&mut self, message_id: MessageId, text: &str, options: &SendOptions) -> io::Result<()> {
        let mut block = render_plain(text, options.parse_mode);
        for button in &options.buttons {
            block.push_str(&format!("\n[{}] /{}", button.label, button.data));
        }
        let rows = count_rows(&block, self.width);
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine),
            Print(format!("#{} ", message_id)),
            Print(block.replace('\n', "\r\n")),
            Print("\r\n")
        )?;
        self.out.flush()?;
        self.last_drawn = Some((message_id, rows));
        Ok(())
    }

    fn erase_last(&mut self, message_id: MessageId) -> io::Result<bool> {
        match self.last_drawn {
            Some((drawn, rows)) if drawn == message_id => {
                queue!(
                    self.out,
                    cursor::MoveToPreviousLine(rows),
                    terminal::Clear(ClearType::FromCursorDown)
                )?;
                self.out.flush()?;
                self.last_drawn = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl<W: Write + Send> Channel for ConsoleChannel<W> {
    fn send(&self, chat: ChatId, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let mut state = self.inner.lock();
        let message_id = state.next_id;
        state.next_id += 1;
        state.draw(message_id, text, options)?;
        Ok(MessageHandle {
            chat,
            message_id,
            text: text.to_string(),
        })
    }

    fn edit(&self, message: &MessageHandle, text: &str, options: &SendOptions) -> Result<MessageHandle, ChannelError> {
        let mut state = self.inner.lock();
        state.erase_last(message.message_id)?;
        state.draw(message.message_id, text, options)?;
        Ok(MessageHandle {
            text: text.to_string(),
            ..message.clone()
        })
    }

    fn delete(&self, message: &MessageHandle) -> Result<(), ChannelError> {
        self.inner.lock().erase_last(message.message_id)?;
        Ok(())
    }

    fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::Rejected(format!(
            "the console has no file storage (requested {})",
            file_id
        )))
    }
}

/// Flattens HTML markup back to what a chat client would display.
fn render_plain(text: &str, parse_mode: ParseMode) -> String {
    match parse_mode {
        ParseMode::Plain => text.to_string(),
        ParseMode::Html => HTML_TAG
            .replace_all(text, "")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&amp;", "&"),
    }
}

fn count_rows(block: &str, width: Option<u16>) -> u16 {
    let rows: usize = block
        .split('\n')
        .map(|line| match width {
            Some(width) if width > 0 => line.chars().count().div_ceil(width as usize).max(1),
            _ => 1,
        })
        .sum();
    rows.min(u16::MAX as usize) as u16
}
