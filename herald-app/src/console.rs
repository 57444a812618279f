//! Interactive console: the status sink and the stdin command set.

use herald_core::{error::Result, StatusSink};

/// Prints every state transition to stdout.
#[derive(Debug, Default)]
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn publish(&self, state: &str) -> Result<()> {
        println!("[herald] {state}");
        Ok(())
    }
}

pub const HELP: &str = "\
commands:
  status               state, skill count and diagnostics
  devices              list input devices
  reload               rescan the skills directory
  arm                  accept the next wake check (stub detector)
  say <text>           feed a final transcript to the recognizer
  threshold <value>    set the VAD threshold and save settings
  wake-phrase <text>   set the wake phrase and save settings
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status,
    Devices,
    Reload,
    Arm,
    Say(String),
    SetThreshold(f32),
    SetWakePhrase(String),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "status" => Self::Status,
            "devices" => Self::Devices,
            "reload" => Self::Reload,
            "arm" => Self::Arm,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "say" if !rest.is_empty() => Self::Say(rest.to_string()),
            "wake-phrase" if !rest.is_empty() => Self::SetWakePhrase(rest.to_string()),
            "threshold" => match rest.parse::<f32>() {
                Ok(v) if v.is_finite() && v > 0.0 => Self::SetThreshold(v),
                _ => Self::Invalid(format!("threshold needs a positive number, got '{rest}'")),
            },
            _ => Self::Invalid(format!("unknown command '{line}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_verbs() {
        assert_eq!(ConsoleCommand::parse("status"), ConsoleCommand::Status);
        assert_eq!(ConsoleCommand::parse("  QUIT \n"), ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("exit"), ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("?"), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Empty);
    }

    #[test]
    fn keeps_argument_text() {
        assert_eq!(
            ConsoleCommand::parse("say  открой   браузер "),
            ConsoleCommand::Say("открой   браузер".into())
        );
        assert_eq!(
            ConsoleCommand::parse("wake-phrase Пятница"),
            ConsoleCommand::SetWakePhrase("Пятница".into())
        );
    }

    #[test]
    fn validates_threshold() {
        assert_eq!(
            ConsoleCommand::parse("threshold 0.02"),
            ConsoleCommand::SetThreshold(0.02)
        );
        assert!(matches!(
            ConsoleCommand::parse("threshold loud"),
            ConsoleCommand::Invalid(_)
        ));
        assert!(matches!(
            ConsoleCommand::parse("threshold -1"),
            ConsoleCommand::Invalid(_)
        ));
    }

    #[test]
    fn rejects_unknown_and_missing_arguments() {
        assert!(matches!(ConsoleCommand::parse("dance"), ConsoleCommand::Invalid(_)));
        assert!(matches!(ConsoleCommand::parse("say"), ConsoleCommand::Invalid(_)));
    }

    #[test]
    fn status_sink_never_fails() {
        assert!(ConsoleStatus.publish("IDLE").is_ok());
    }
}
