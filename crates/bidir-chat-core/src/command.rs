//! User input and its parsed form.

use crate::Credentials;

/// Token that ends the interactive loop.
pub const QUIT_TOKEN: &str = "/quit";

/// Prefix reserved for control tokens.
pub const CONTROL_MARKER: char = '/';

/// Hint shown for unknown control tokens.
pub const USAGE_HINT: &str = "enter /quit to exit.";

/// One unit of input from a user-facing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A typed line.
    Line(String),
    /// A complete credential pair, as submitted by a sign-in form.
    Credentials(Credentials),
    /// Explicit sign-out.
    Quit,
}

impl Input {
    /// Build a line input.
    pub fn line(s: impl Into<String>) -> Self {
        Self::Line(s.into())
    }
}

/// Action parsed from one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forward the text to the session.
    Say(String),
    /// Terminate the session.
    Quit,
    /// Control token other than quit.
    Unknown(String),
    /// Blank line.
    Empty,
}

impl Command {
    /// Parse one line of input.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Self::Empty
        } else if line == QUIT_TOKEN {
            Self::Quit
        } else if line.starts_with(CONTROL_MARKER) {
            Self::Unknown(line.to_string())
        } else {
            Self::Say(line.to_string())
        }
    }
}

impl From<Input> for Option<Command> {
    fn from(input: Input) -> Self {
        match input {
            Input::Line(line) => Some(Command::parse(&line)),
            Input::Quit => Some(Command::Quit),
            Input::Credentials(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("hello"), Command::Say("hello".into()));
        assert_eq!(Command::parse("  hello  \n"), Command::Say("hello".into()));
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse(" /quit\n"), Command::Quit);
        assert_eq!(Command::parse("/help"), Command::Unknown("/help".into()));
        assert_eq!(Command::parse("/quitnow"), Command::Unknown("/quitnow".into()));
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_input_into_command() {
        assert_eq!(Option::<Command>::from(Input::Quit), Some(Command::Quit));
        assert_eq!(
            Option::<Command>::from(Input::line("a")),
            Some(Command::Say("a".into()))
        );
        assert_eq!(
            Option::<Command>::from(Input::Credentials(Credentials::new("a", "b"))),
            None
        );
    }
}
