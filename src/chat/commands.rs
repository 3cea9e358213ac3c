//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to manage sessions without sending messages to the
//! backend. Session numbers refer to the numbering shown by `/list`.

use crate::types::Category;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new session and select it.
    New,

    /// List sessions grouped by category.
    List,

    /// Select the session with this list number.
    Select(usize),

    /// Delete the session with this list number, or the current one.
    Delete(Option<usize>),

    /// File a session under a category. `None` targets the current session.
    Category(Category, Option<usize>),

    /// Set or clear the display name.
    /// `None` clears the stored name.
    Name(Option<String>),

    /// Reprint the current session's messages.
    History,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use majlis::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/select 2").is_some());
/// assert!(parse_command("ما حكم الوضوء؟").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "list" | "ls" => ChatCommand::List,
        "select" | "open" => match argument {
            Some(arg) => match parse_number(arg) {
                Ok(number) => ChatCommand::Select(number),
                Err(err) => ChatCommand::Invalid(format!("/select {err}")),
            },
            None => ChatCommand::Invalid("/select requires a session number".to_string()),
        },
        "delete" | "rm" => match argument.map(parse_number) {
            Some(Ok(number)) => ChatCommand::Delete(Some(number)),
            Some(Err(err)) => ChatCommand::Invalid(format!("/delete {err}")),
            None => ChatCommand::Delete(None),
        },
        "category" => parse_category_command(argument),
        "name" => ChatCommand::Name(argument.map(|s| s.to_string())),
        "history" => ChatCommand::History,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_category_command(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid(format!(
            "/category requires one of: {}",
            category_names()
        ));
    };

    let (name, number) = match arg.rsplit_once(' ') {
        Some((name, last)) if last.chars().all(|c| c.is_ascii_digit()) => {
            match parse_number(last) {
                Ok(number) => (name.trim(), Some(number)),
                Err(err) => return ChatCommand::Invalid(format!("/category {err}")),
            }
        }
        _ => (arg, None),
    };

    match name.parse::<Category>() {
        Ok(category) => ChatCommand::Category(category, number),
        Err(_) => ChatCommand::Invalid(format!(
            "Unknown category '{name}' (use one of: {})",
            category_names()
        )),
    }
}

fn parse_number(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(number) if number > 0 => Ok(number),
        _ => Err("expects a session number from /list".to_string()),
    }
}

fn category_names() -> String {
    Category::ALL
        .iter()
        .map(|category| category.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new session
  /list                  List sessions by category
  /select <n>            Switch to session n from /list
  /delete [n]            Delete session n (default: the current session)
  /category <name> [n]   File session n (default: current) under a category
                         (creed, jurisprudence, tradition, biography, uncategorized)
  /name [display name]   Set the name the assistant calls you (no argument clears it)
  /history               Show the current session
  /help                  Show this help message
  /quit                  Exit the chat
Press Ctrl+C while a reply is streaming to stop it."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New));
        assert_eq!(parse_command("/LIST"), Some(ChatCommand::List));
        assert_eq!(parse_command("/select 3"), Some(ChatCommand::Select(3)));
        assert_eq!(parse_command("/delete"), Some(ChatCommand::Delete(None)));
        assert_eq!(parse_command("/delete 2"), Some(ChatCommand::Delete(Some(2))));
        assert_eq!(parse_command("/history"), Some(ChatCommand::History));
    }

    #[test]
    fn parse_bad_numbers() {
        assert!(matches!(
            parse_command("/select"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/select zero"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("expects")
        ));
        assert!(matches!(
            parse_command("/delete 0"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_category() {
        assert_eq!(
            parse_command("/category fiqh"),
            Some(ChatCommand::Category(Category::Jurisprudence, None))
        );
        assert_eq!(
            parse_command("/category creed 4"),
            Some(ChatCommand::Category(Category::Creed, Some(4)))
        );
        assert_eq!(
            parse_command("/category غير مصنف 2"),
            Some(ChatCommand::Category(Category::Uncategorized, Some(2)))
        );
        assert!(matches!(
            parse_command("/category poetry"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("Unknown category")
        ));
        assert!(matches!(
            parse_command("/category"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
    }

    #[test]
    fn parse_name() {
        assert_eq!(
            parse_command("/name Fatima Zahra"),
            Some(ChatCommand::Name(Some("Fatima Zahra".to_string())))
        );
        assert_eq!(parse_command("/name"), Some(ChatCommand::Name(None)));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("/frobnicate"),
            Some(ChatCommand::Invalid("Unknown command: /frobnicate".to_string()))
        );
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("السلام عليكم"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(help.contains("/quit"));
        assert!(help.contains("/new"));
        assert!(help.contains("/category"));
    }
}
