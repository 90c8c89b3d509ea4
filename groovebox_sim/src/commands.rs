//! Parses simple one-line text commands from stdin into [`Command`]s on a
//! background thread, standing in for the buttons/pots/transport controls a
//! real panel would drive directly. Not part of the core; purely a demo
//! harness for `groovebox_sim`.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;

#[derive(Clone, Debug)]
pub enum Command {
    Press(u8),
    Rotary(u8, u8),
    Slider(u8, u8),
    Select(u8, u8, u8),
    Start,
    Stop,
    Save(String),
    Load(String),
    ReloadMode(u8),
    Help,
    Quit,
}

fn parse_line(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "press" => Some(Command::Press(parts.next()?.parse().ok()?)),
        "rotary" => Some(Command::Rotary(
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        )),
        "slider" => Some(Command::Slider(
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        )),
        "select" => Some(Command::Select(
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        )),
        "start" => Some(Command::Start),
        "stop" => Some(Command::Stop),
        "save" => Some(Command::Save(parts.next()?.to_string())),
        "load" => Some(Command::Load(parts.next()?.to_string())),
        "reload" => Some(Command::ReloadMode(parts.next()?.parse().ok()?)),
        "help" | "?" => Some(Command::Help),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// Spawn a thread reading newline-delimited commands from stdin, forwarding
/// each successfully-parsed one over the returned channel. Unrecognised
/// lines are logged and skipped.
pub fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            match parse_line(line.trim()) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("unrecognised command: {line:?} (try `help`)"),
            }
        }
    });
    rx
}

pub const HELP_TEXT: &str = "\
commands:
  press <0-15>                toggle step button i
  rotary <0-3> <0-127>        set a rotary pot
  slider <0-3> <0-127>        set a slider pot
  select <mode> <pattern> <track>  jump the UI selection directly
  start / stop                transport
  save <path> / load <path>   song persistence
  reload <mode>                rebuild one mode's script from disk
  quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_press_and_rotary() {
        assert!(matches!(parse_line("press 3"), Some(Command::Press(3))));
        assert!(matches!(
            parse_line("rotary 1 64"),
            Some(Command::Rotary(1, 64))
        ));
    }

    #[test]
    fn unknown_command_is_none() {
        assert!(parse_line("banana").is_none());
    }
}
