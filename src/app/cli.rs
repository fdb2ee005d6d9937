use std::io::{self, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
};
use log::info;

use crate::app::commands::CommandRouter;
use crate::models::message::{parse_command, ChatId, InboundEvent, Sender};

const PROMPT: &str = ">>> ";
const CONSOLE_CHAT: ChatId = 0;

/// What one entered line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Exit,
    Event(InboundEvent),
    Unknown(String),
}

/// Reads commands from the local terminal and feeds them to `router` until `exit`.
pub fn run_console(router: &CommandRouter) -> io::Result<()> {
    println!("Shell bot console started. Try /sh echo hi, /ps, /ls or 'exit' to quit.");
    let _raw = RawMode::enable()?;
    let mut editor = LineEditor::default();
    let mut serial = 0;

    loop {
        print!("\r{}", PROMPT);
        io::stdout().flush()?;

        // Ctrl-C leaves the same way `exit` does.
        let line = read_line(&mut editor)?.unwrap_or_else(|| "exit".to_string());
        serial += 1;

        match parse_line(&line, serial) {
            ConsoleInput::Empty => continue,
            ConsoleInput::Exit => {
                print!("\rExiting the program...\r\n");
                router.context().orchestrator.shutdown();
                return Ok(());
            }
            ConsoleInput::Event(event) => {
                info!("console: {}", line.trim());
                // Runs in the background; its live message redraws on its own.
                drop(router.handle(event));
            }
            ConsoleInput::Unknown(text) => {
                print!("\rUnknown command: {}. Commands start with '/'.\r\n", text);
            }
        }
    }
}

/// Turns a typed line into an event from the local operator.
///
/// `/stop:3` style lines press the button carrying that data; any other `/name args`
/// line is a command.
pub fn parse_line(line: &str, serial: i64) -> ConsoleInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleInput::Empty;
    }
    if trimmed == "exit" {
        return ConsoleInput::Exit;
    }
    let Some((name, payload)) = parse_command(trimmed) else {
        return ConsoleInput::Unknown(trimmed.to_string());
    };
    let sender = Sender {
        user_id: 0,
        username: None,
    };
    if name.contains(':') {
        return ConsoleInput::Event(InboundEvent::Callback {
            sender,
            chat: CONSOLE_CHAT,
            message_id: None,
            callback_id: format!("console-{}", serial),
            data: name,
        });
    }
    ConsoleInput::Event(InboundEvent::Command {
        sender,
        chat: CONSOLE_CHAT,
        message_id: serial,
        name,
        payload,
    })
}

/// Returns `None` on Ctrl-C or Ctrl-D.
fn read_line(editor: &mut LineEditor) -> io::Result<Option<String>> {
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Release {
                continue;
            }
            match editor.apply(key) {
                Edit::Redraw => redraw(editor.current())?,
                Edit::Echo(c) => {
                    print!("{}", c);
                    io::stdout().flush()?;
                }
                Edit::Submit(line) => {
                    print!("\r\n");
                    return Ok(Some(line));
                }
                Edit::Interrupt => {
                    print!("\r\n");
                    return Ok(None);
                }
                Edit::Nothing => {}
            }
        }
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine)
    )?;
    print!("{}{}", PROMPT, input);
    io::stdout().flush()
}

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Nothing,
    Echo(char),
    Redraw,
    Submit(String),
    Interrupt,
}

/// Single-line input with history recall.
#[derive(Default)]
struct LineEditor {
    input: String,
    history: Vec<String>,
    history_index: usize,
}

impl LineEditor {
    fn current(&self) -> &str {
        &self.input
    }

    fn apply(&mut self, key: KeyEvent) -> Edit {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') | KeyCode::Char('d') => Edit::Interrupt,
                _ => Edit::Nothing,
            };
        }
        match key.code {
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.input);
                if !line.trim().is_empty() {
                    self.history.push(line.clone());
                }
                self.history_index = self.history.len();
                Edit::Submit(line)
            }
            KeyCode::Up => {
                if self.history.is_empty() {
                    return Edit::Nothing;
                }
                self.history_index = self.history_index.saturating_sub(1);
                self.input = self.history[self.history_index].clone();
                Edit::Redraw
            }
            KeyCode::Down => {
                if self.history_index < self.history.len() {
                    self.history_index += 1;
                }
                self.input = self
                    .history
                    .get(self.history_index)
                    .cloned()
                    .unwrap_or_default();
                Edit::Redraw
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                Edit::Echo(c)
            }
            KeyCode::Backspace => {
                self.input.pop();
                Edit::Redraw
            }
            _ => Edit::Nothing,
        }
    }
}
