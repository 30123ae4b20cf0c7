use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tracing::warn;

use crate::error::MalqError;

pub const HELP: &str = "Commands are listed here:
  sm : Search MAL directly
  al : Search MAL and add a show to your list
  rl : Remove a show from your list
  sl : Search your list
  cl : Check status of your list
  ra : Refresh every show in your list, including finished ones
  ds : Show details and related shows for a list entry
  qb : Search qBittorrent for torrent links
  q  : Save and quit (Ctrl-C and Ctrl-D also quit)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    Line(String),
    Interrupt,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SearchCatalog,
    AddToList,
    RemoveFromList,
    SearchList,
    CheckList,
    RefreshAll,
    Details,
    SearchTransfers,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = MalqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sm" => Ok(Command::SearchCatalog),
            "al" => Ok(Command::AddToList),
            "rl" => Ok(Command::RemoveFromList),
            "sl" => Ok(Command::SearchList),
            "cl" => Ok(Command::CheckList),
            "ra" => Ok(Command::RefreshAll),
            "ds" => Ok(Command::Details),
            "qb" => Ok(Command::SearchTransfers),
            "h" | "?" => Ok(Command::Help),
            "q" | "quit" => Ok(Command::Quit),
            other => Err(MalqError::MalformedInput(format!(
                "unknown command '{other}', type 'h' or '?' to get help"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer<T> {
    Value(T),
    Cancelled,
    Quit,
}

pub struct Prompt<W: Write> {
    events: Receiver<PromptEvent>,
    out: W,
}

impl Prompt<io::Stdout> {
    /// Reads stdin on a background thread and turns Ctrl-C into
    /// [`PromptEvent::Interrupt`] so the session can save before exiting.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel();
        let interrupt_tx = tx.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            let _ = interrupt_tx.send(PromptEvent::Interrupt);
        }) {
            warn!(error = %err, "could not install interrupt handler");
        }
        spawn_stdin_reader(tx);
        Self::new(rx, io::stdout())
    }
}

fn spawn_stdin_reader(tx: Sender<PromptEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(PromptEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(PromptEvent::Eof);
    });
}

impl<W: Write> Prompt<W> {
    pub fn new(events: Receiver<PromptEvent>, out: W) -> Self {
        Self { events, out }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn say(&mut self, message: impl fmt::Display) -> Result<(), MalqError> {
        writeln!(self.out, "{message}").map_err(terminal_error)
    }

    pub fn line(&mut self, message: &str) -> Result<Answer<String>, MalqError> {
        write!(self.out, "{message}").map_err(terminal_error)?;
        self.out.flush().map_err(terminal_error)?;
        match self.events.recv() {
            Ok(PromptEvent::Line(line)) => Ok(Answer::Value(line.trim().to_string())),
            Ok(PromptEvent::Interrupt) | Ok(PromptEvent::Eof) | Err(_) => {
                writeln!(self.out).map_err(terminal_error)?;
                Ok(Answer::Quit)
            }
        }
    }

    pub fn index(&mut self, message: &str, len: usize) -> Result<Answer<usize>, MalqError> {
        let message = format!("{message}(or cancel (c)) ");
        loop {
            let line = match self.line(&message)? {
                Answer::Value(line) => line,
                Answer::Cancelled => return Ok(Answer::Cancelled),
                Answer::Quit => return Ok(Answer::Quit),
            };
            if line.eq_ignore_ascii_case("c") {
                return Ok(Answer::Cancelled);
            }
            match line.parse::<usize>() {
                Ok(index) if index < len => return Ok(Answer::Value(index)),
                Ok(_) => self.say(format!("Out of range, pick an index below {len}."))?,
                Err(_) => self.say("Invalid, please enter an integer.")?,
            }
        }
    }
}

fn terminal_error(err: io::Error) -> MalqError {
    MalqError::Terminal(err.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn prompt(lines: &[&str]) -> Prompt<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        for line in lines {
            tx.send(PromptEvent::Line(line.to_string())).unwrap();
        }
        tx.send(PromptEvent::Eof).unwrap();
        Prompt::new(rx, Vec::new())
    }

    #[test]
    fn parse_commands() {
        assert_eq!("AL".parse::<Command>().unwrap(), Command::AddToList);
        assert_eq!("?".parse::<Command>().unwrap(), Command::Help);
        assert_matches!("zz".parse::<Command>(), Err(MalqError::MalformedInput(_)));
    }

    #[test]
    fn index_retries_until_valid() {
        let mut prompt = prompt(&["two", "9", "1"]);
        assert_eq!(prompt.index("Pick? ", 3).unwrap(), Answer::Value(1));
        let output = String::from_utf8(prompt.into_output()).unwrap();
        assert!(output.contains("Invalid, please enter an integer."));
        assert!(output.contains("Out of range"));
    }

    #[test]
    fn index_cancel_and_eof() {
        let mut prompt = prompt(&["C"]);
        assert_eq!(prompt.index("Pick? ", 3).unwrap(), Answer::Cancelled);
        assert_eq!(prompt.index("Pick? ", 3).unwrap(), Answer::Quit);
    }
}
