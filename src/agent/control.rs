//! Control channel command parsing
//!
//! Commands are string-framed: the first whitespace-delimited token is the
//! verb, anything after it is the argument. The channel is trusted and
//! closed; the five verbs below are the whole protocol, and anything else
//! is an integration defect that must surface immediately rather than be
//! masked as a recoverable error.

use tracing::error;

/// A parsed control channel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `START` - establish the broker session from the current configuration
    Start,
    /// `STOP` - release the broker session
    Stop,
    /// `VERBOSE` - enable verbose logging
    Verbose,
    /// `CONFIG <text>` - replace the configuration tree; `None` when the
    /// argument is missing
    Config(Option<String>),
    /// `$TERM` - exit the agent loop
    Terminate,
}

impl ControlCommand {
    /// Parse one control channel frame.
    ///
    /// # Panics
    ///
    /// Panics on an unrecognized verb. Callers of the control channel must
    /// only ever send the five recognized commands.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or("");
        let argument = parts
            .next()
            .filter(|rest| !rest.trim().is_empty())
            .map(str::to_string);

        match verb {
            "START" => ControlCommand::Start,
            "STOP" => ControlCommand::Stop,
            "VERBOSE" => ControlCommand::Verbose,
            "CONFIG" => ControlCommand::Config(argument),
            "$TERM" => ControlCommand::Terminate,
            other => {
                error!(command = other, "invalid control command");
                panic!("invalid control command '{other}'");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(ControlCommand::parse("START"), ControlCommand::Start);
        assert_eq!(ControlCommand::parse("STOP"), ControlCommand::Stop);
        assert_eq!(ControlCommand::parse("VERBOSE"), ControlCommand::Verbose);
        assert_eq!(ControlCommand::parse("$TERM"), ControlCommand::Terminate);
    }

    #[test]
    fn test_parse_config_with_argument() {
        let cmd = ControlCommand::parse("CONFIG [malamute]\nendpoint = \"tcp://x\"\n");
        match cmd {
            ControlCommand::Config(Some(text)) => {
                assert!(text.contains("endpoint"));
            }
            other => panic!("expected Config with text, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_without_argument() {
        assert_eq!(
            ControlCommand::parse("CONFIG"),
            ControlCommand::Config(None)
        );
        assert_eq!(
            ControlCommand::parse("CONFIG   "),
            ControlCommand::Config(None)
        );
    }

    #[test]
    #[should_panic(expected = "invalid control command 'PAUSE'")]
    fn test_unrecognized_verb_is_fatal() {
        ControlCommand::parse("PAUSE");
    }
}
