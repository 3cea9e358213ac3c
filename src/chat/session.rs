//! The terminal front end's view of the session directory.
//!
//! `ChatSession` turns parsed slash commands into directory operations and sends regular input
//! through the aggregator. It returns text for the caller to print instead of printing, so the
//! REPL stays a thin loop.

use std::sync::{Arc, MutexGuard, PoisonError};

use crate::aggregator::{StreamOutcome, StreamingAggregator};
use crate::chat::commands::{ChatCommand, help_text};
use crate::directory::{DirectoryObserver, SessionDirectory, SessionGroup, SharedDirectory};
use crate::display::{DisplaySink, project_markup};
use crate::error::{Error, Result};
use crate::markup::render_with;
use crate::types::{Category, SessionId};

/// ANSI escape code for bold text (used for the current session marker).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for list metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for yellow text (used for warnings).
const ANSI_YELLOW: &str = "\x1b[33m";

/// What the REPL should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Print these lines and keep reading input.
    Continue(Vec<String>),
    /// Leave the REPL.
    Quit,
}

/// Reports persistence problems on stderr.
#[derive(Debug, Clone, Copy)]
pub struct TerminalObserver {
    use_color: bool,
}

impl TerminalObserver {
    /// Creates an observer with the given color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self { use_color }
    }
}

impl DirectoryObserver for TerminalObserver {
    fn persistence_failed(&self, error: &Error) {
        if self.use_color {
            eprintln!("{ANSI_YELLOW}Warning:{ANSI_RESET} {error} (changes are kept for this run)");
        } else {
            eprintln!("Warning: {error} (changes are kept for this run)");
        }
    }
}

/// Front-end state over the directory and aggregator.
pub struct ChatSession {
    aggregator: Arc<StreamingAggregator>,
    directory: SharedDirectory,
    use_color: bool,
}

impl ChatSession {
    /// Creates a chat session over `aggregator`.
    pub fn new(aggregator: Arc<StreamingAggregator>, use_color: bool) -> Self {
        let directory = aggregator.directory();
        Self {
            aggregator,
            directory,
            use_color,
        }
    }

    /// The aggregator, for cancellation from a signal handler.
    pub fn aggregator(&self) -> Arc<StreamingAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// The current session id.
    pub fn current_id(&self) -> Option<SessionId> {
        self.directory().current_id()
    }

    /// A one-line description of the current session.
    pub fn current_banner(&self) -> String {
        let directory = self.directory();
        match directory.current() {
            Some(session) => format!(
                "[{}] {} ({} messages)",
                session.category.label(),
                session.title,
                session.message_count()
            ),
            None => "(no session)".to_string(),
        }
    }

    /// Sends `text` to the current session.
    pub async fn send(&self, text: &str, sink: &mut dyn DisplaySink) -> Result<StreamOutcome> {
        let current = self
            .current_id()
            .ok_or_else(|| Error::not_found("no current session", None))?;
        self.aggregator.send_message(current, text, sink).await
    }

    /// Applies a slash command.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed commands and unknown session numbers.
    pub fn handle(&self, command: ChatCommand) -> Result<CommandReply> {
        let lines = match command {
            ChatCommand::Quit => return Ok(CommandReply::Quit),
            ChatCommand::Help => help_text().lines().map(str::to_string).collect(),
            ChatCommand::New => {
                self.directory().create();
                vec![format!("Started a new session. {}", self.current_banner())]
            }
            ChatCommand::List => self.list_lines(),
            ChatCommand::Select(number) => {
                let id = self.resolve(Some(number))?;
                self.directory().select(id)?;
                let mut lines = vec![format!("Switched to {}", self.current_banner())];
                lines.extend(self.history_lines());
                lines
            }
            ChatCommand::Delete(number) => {
                let id = self.resolve(number)?;
                self.aggregator.delete_session(id);
                vec![format!("Session deleted. Now in {}", self.current_banner())]
            }
            ChatCommand::Category(category, number) => {
                let id = self.resolve(number)?;
                self.directory().recategorize(id, category);
                vec![format!("Filed under {} ({}).", category.label(), category.key())]
            }
            ChatCommand::Name(name) => {
                let mut directory = self.directory();
                directory.set_display_name(name.as_deref());
                match directory.display_name() {
                    Some(name) => vec![format!("Display name set to {name}.")],
                    None => vec!["Display name cleared.".to_string()],
                }
            }
            ChatCommand::History => self.history_lines(),
            ChatCommand::Invalid(message) => return Err(Error::validation(message, None)),
        };
        Ok(CommandReply::Continue(lines))
    }

    /// Lines describing every session, numbered for `/select`.
    pub fn list_lines(&self) -> Vec<String> {
        let directory = self.directory();
        let current = directory.current_id();
        let mut lines = Vec::new();
        let mut number = 0usize;
        for group in directory.list_grouped() {
            lines.push(self.group_header(group.category));
            for summary in &group.sessions {
                number += 1;
                let marker = if Some(summary.id) == current { "*" } else { " " };
                let line = format!(
                    "{marker} {number:>3}. {} {}",
                    summary.title,
                    self.dim(&format!("({} messages)", summary.message_count))
                );
                if Some(summary.id) == current && self.use_color {
                    lines.push(format!("{ANSI_BOLD}{line}{ANSI_RESET}"));
                } else {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// The current session's messages, projected for the terminal.
    pub fn history_lines(&self) -> Vec<String> {
        let directory = self.directory();
        let Some(session) = directory.current() else {
            return Vec::new();
        };
        let wrapping = self.aggregator.config().list_wrapping;
        let mut lines = Vec::new();
        for message in &session.messages {
            let who = if message.is_user() { "You" } else { "Majlis" };
            lines.push(format!("{who}:"));
            let markup = render_with(&message.content, wrapping);
            let projected = project_markup(&markup, self.use_color);
            lines.extend(projected.trim_end_matches('\n').lines().map(str::to_string));
            for citation in &message.citations {
                lines.push(self.dim(&format!(
                    "  - {} <{}>",
                    citation.display_title(),
                    citation.uri
                )));
            }
        }
        lines
    }

    fn resolve(&self, number: Option<usize>) -> Result<SessionId> {
        let directory = self.directory();
        match number {
            None => directory
                .current_id()
                .ok_or_else(|| Error::not_found("no current session", None)),
            Some(number) => numbered(&directory.list_grouped())
                .get(number.wrapping_sub(1))
                .copied()
                .ok_or_else(|| {
                    Error::validation(
                        format!("there is no session {number}; run /list to see the numbers"),
                        Some("number".to_string()),
                    )
                }),
        }
    }

    fn group_header(&self, category: Category) -> String {
        let header = format!("{} ({})", category.label(), category.key());
        if self.use_color {
            format!("{ANSI_BOLD}{header}{ANSI_RESET}")
        } else {
            header
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.use_color {
            format!("{ANSI_DIM}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn directory(&self) -> MutexGuard<'_, SessionDirectory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Session ids in `/list` order.
fn numbered(groups: &[SessionGroup]) -> Vec<SessionId> {
    groups
        .iter()
        .flat_map(|group| group.sessions.iter().map(|summary| summary.id))
        .collect()
}
