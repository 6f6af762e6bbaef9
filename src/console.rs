//! Headless console frontend: line commands on stdin.

use crate::playback::{Input, Prompt};
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// A frontend action: a player input or a session command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Input(Input),
    Save,
    Reset,
    Restart,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("buttons are numbered from 1")]
    ZeroButton,
    #[error("unknown command: {0}")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    /// Numbers select the shown button, counting from 1.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let word = line.trim().to_ascii_lowercase();
        if word.is_empty() {
            return Err(ParseCommandError::Empty);
        }
        if let Ok(n) = word.parse::<usize>() {
            return match n {
                0 => Err(ParseCommandError::ZeroButton),
                n => Ok(Command::Input(Input::Select(n - 1))),
            };
        }

        match word.as_str() {
            "c" | "continue" => Ok(Command::Input(Input::Continue)),
            "s" | "skip" => Ok(Command::Input(Input::Skip)),
            "save" => Ok(Command::Save),
            "reset" => Ok(Command::Reset),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            "h" | "help" | "?" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            _ => Err(ParseCommandError::Unknown(word)),
        }
    }
}

pub const HELP: &str = "commands: c(ontinue), s(kip), <n> select button n, save, reset, restart, status, q(uit)";

/// Render a prompt as console text.
pub fn describe_prompt(prompt: &Prompt<'_>) -> String {
    let mut out = String::new();
    match prompt {
        Prompt::Dialogue(dialogue) => {
            let _ = write!(out, "\"{}\"  [c] {}", dialogue.text, dialogue.continue_label);
        }
        Prompt::Choices(choices) => {
            out.push_str("Choose:");
            for (i, choice) in choices.iter().enumerate() {
                let _ = write!(out, "\n  [{}] {}", i + 1, choice.label);
            }
        }
        Prompt::Pause(pause) => {
            out.push_str(if pause.text.is_empty() { "Paused" } else { pause.text.as_str() });
            if pause.buttons.is_empty() {
                out.push_str("  [c] Continue");
            }
            for (i, button) in pause.buttons.iter().enumerate() {
                let _ = write!(out, "\n  [{}] {}", i + 1, button.label);
            }
        }
        Prompt::Continue => out.push_str("[c] Continue"),
    }
    out
}

/// Read commands from stdin on a background task.
///
/// The channel yields `Quit` when stdin closes.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(ParseCommandError::Empty) => {}
                    Err(e) => {
                        tracing::warn!("{}", e);
                        println!("{}", HELP);
                    }
                },
                Ok(None) => {
                    let _ = tx.send(Command::Quit);
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    let _ = tx.send(Command::Quit);
                    break;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Choice, PauseButton, PauseSpec};

    #[test]
    fn parses_inputs() {
        assert_eq!("c".parse(), Ok(Command::Input(Input::Continue)));
        assert_eq!(" Skip ".parse(), Ok(Command::Input(Input::Skip)));
        assert_eq!("1".parse(), Ok(Command::Input(Input::Select(0))));
        assert_eq!("3".parse(), Ok(Command::Input(Input::Select(2))));
    }

    #[test]
    fn parses_session_commands() {
        assert_eq!("save".parse(), Ok(Command::Save));
        assert_eq!("RESET".parse(), Ok(Command::Reset));
        assert_eq!("q".parse(), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_lines() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!("0".parse::<Command>(), Err(ParseCommandError::ZeroButton));
        assert_eq!(
            "jump".parse::<Command>(),
            Err(ParseCommandError::Unknown("jump".to_string()))
        );
    }

    #[test]
    fn choices_are_numbered_from_one() {
        let choices = vec![
            Choice {
                label: "Open".to_string(),
                target: 2,
                set_flag: String::new(),
            },
            Choice {
                label: "Leave".to_string(),
                target: 3,
                set_flag: String::new(),
            },
        ];
        let text = describe_prompt(&Prompt::Choices(&choices));
        assert!(text.contains("[1] Open"));
        assert!(text.contains("[2] Leave"));
    }

    #[test]
    fn buttonless_pause_offers_continue() {
        let pause = PauseSpec {
            at: 1.0,
            buttons: Vec::new(),
            text: String::new(),
        };
        assert_eq!(describe_prompt(&Prompt::Pause(&pause)), "Paused  [c] Continue");

        let pause = PauseSpec {
            buttons: vec![PauseButton {
                label: "Knock".to_string(),
                set_flag: "knocked".to_string(),
            }],
            ..pause
        };
        assert!(describe_prompt(&Prompt::Pause(&pause)).contains("[1] Knock"));
    }
}
