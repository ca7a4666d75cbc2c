//! Parsing of typed input lines and formatting of chat output.

use sweetspeak_proto::message::TextMessage;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/chat <name>`: request a chat with `name`.
    Chat(String),
    /// `/quit`: leave.
    Quit,
    /// Any other non-empty line: send it to the active chat.
    Say(String),
    /// Blank line or an unusable command.
    Nothing,
}

impl Command {
    /// Interprets one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Nothing;
        }

        match line.trim().split_once(char::is_whitespace) {
            Some(("/chat", name)) if !name.trim().is_empty() => Self::Chat(name.trim().to_string()),
            None if line.trim() == "/chat" => Self::Nothing,
            None if line.trim() == "/quit" => Self::Quit,
            _ => Self::Say(line.to_string()),
        }
    }
}

/// Renders a chat line as `name: content`.
#[must_use]
pub fn format_message(message: &TextMessage) -> String {
    format!("{}: {}", message.from.name, message.content)
}
