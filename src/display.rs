//! Presentation of streamed replies.
//!
//! The aggregator talks to the presentation layer only through [`DisplaySink`]. Content handed to
//! a sink is always complete markup for the reply so far, never a fragment, so a sink can simply
//! replace what it shows.

use std::io::{self, Stdout, Write};

use crate::types::{Citation, SessionId};

/// ANSI escape code for bold text.
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for citations).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code that erases the current line.
const ANSI_ERASE_LINE: &str = "\x1b[2K";

/// Shown in place of a reply that has no printable text yet.
const PENDING_MARKER: &str = "…";

/// Identifies one in-progress reply inside a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyHandle(u64);

impl ReplyHandle {
    /// Creates a handle from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// The display capability the streaming aggregator drives.
pub trait DisplaySink: Send {
    /// Shows the user's message before the reply starts.
    fn show_user_message(&mut self, session_id: SessionId, text: &str) {
        _ = session_id;
        _ = text;
    }

    /// Shows a pending reply for `session_id` and returns its handle.
    fn show_placeholder(&mut self, session_id: SessionId) -> ReplyHandle;

    /// Replaces the reply content with `markup`.
    fn update_content(&mut self, handle: ReplyHandle, markup: &str);

    /// Shows the final reply content and its sources.
    fn finalize(&mut self, handle: ReplyHandle, markup: &str, citations: &[Citation]);

    /// Replaces the reply with an error rendering.
    fn show_error(&mut self, handle: ReplyHandle, markup: &str);
}

////////////////////////////////////////// RecordingSink ///////////////////////////////////////////

/// One call made on a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// `show_user_message` was called.
    UserMessage(SessionId, String),
    /// `show_placeholder` was called.
    Placeholder(SessionId, ReplyHandle),
    /// `update_content` was called.
    Update(ReplyHandle, String),
    /// `finalize` was called.
    Finalize(ReplyHandle, String, Vec<Citation>),
    /// `show_error` was called.
    Error(ReplyHandle, String),
}

/// A sink that records every call, for tests and headless use.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Calls in the order they were made.
    pub events: Vec<SinkEvent>,
    next_handle: u64,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every markup string passed to `update_content`, in order.
    pub fn updates(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Update(_, markup) => Some(markup.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The markup passed to `finalize`, if it was called.
    pub fn finalized(&self) -> Option<&str> {
        self.events.iter().find_map(|event| match event {
            SinkEvent::Finalize(_, markup, _) => Some(markup.as_str()),
            _ => None,
        })
    }

    /// The markup passed to `show_error`, if it was called.
    pub fn error(&self) -> Option<&str> {
        self.events.iter().find_map(|event| match event {
            SinkEvent::Error(_, markup) => Some(markup.as_str()),
            _ => None,
        })
    }
}

impl DisplaySink for RecordingSink {
    fn show_user_message(&mut self, session_id: SessionId, text: &str) {
        self.events.push(SinkEvent::UserMessage(session_id, text.to_string()));
    }

    fn show_placeholder(&mut self, session_id: SessionId) -> ReplyHandle {
        self.next_handle += 1;
        let handle = ReplyHandle::new(self.next_handle);
        self.events.push(SinkEvent::Placeholder(session_id, handle));
        handle
    }

    fn update_content(&mut self, handle: ReplyHandle, markup: &str) {
        self.events.push(SinkEvent::Update(handle, markup.to_string()));
    }

    fn finalize(&mut self, handle: ReplyHandle, markup: &str, citations: &[Citation]) {
        self.events.push(SinkEvent::Finalize(
            handle,
            markup.to_string(),
            citations.to_vec(),
        ));
    }

    fn show_error(&mut self, handle: ReplyHandle, markup: &str) {
        self.events.push(SinkEvent::Error(handle, markup.to_string()));
    }
}

/////////////////////////////////////////// TerminalSink ///////////////////////////////////////////

/// Prints replies to stdout, projecting markup to plain text with optional ANSI styling.
///
/// Complete lines are printed as soon as they are stable. If a later update rewrites text that
/// was already printed, the whole reply is printed again once it is final. Until the first line
/// is printed a pending marker holds the reply's place.
pub struct TerminalSink {
    stdout: Stdout,
    use_color: bool,
    next_handle: u64,
    printed: String,
    diverged: bool,
    pending: bool,
}

impl TerminalSink {
    /// Creates a new TerminalSink with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new TerminalSink with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            next_handle: 0,
            printed: String::new(),
            diverged: false,
            pending: false,
        }
    }

    /// Prints an informational line.
    pub fn print_info(&mut self, info: &str) {
        println!("{info}");
        self.flush();
    }

    /// Prints a warning line to stderr.
    pub fn print_warning(&mut self, warning: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}Warning:{ANSI_RESET} {warning}");
        } else {
            eprintln!("Warning: {warning}");
        }
    }

    /// Prints markup (a user message or a stored reply) in one piece.
    pub fn print_markup(&mut self, markup: &str) {
        let text = project_markup(markup, self.use_color);
        println!("{}", text.trim_end_matches('\n'));
        self.flush();
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn show_pending_marker(&mut self) {
        if self.use_color {
            print!("{ANSI_DIM}{PENDING_MARKER}{ANSI_RESET}");
        } else {
            print!("{PENDING_MARKER}");
        }
        self.pending = true;
        self.flush();
    }

    fn clear_pending_marker(&mut self) {
        if !self.pending {
            return;
        }
        if self.use_color {
            print!("\r{ANSI_ERASE_LINE}");
        } else {
            print!("\r{}\r", " ".repeat(PENDING_MARKER.chars().count()));
        }
        self.pending = false;
        self.flush();
    }

    fn print_stable_prefix(&mut self, projected: &str) {
        if self.diverged {
            return;
        }
        if !projected.starts_with(&self.printed) {
            self.diverged = true;
            return;
        }
        let Some(stable_end) = projected.rfind('\n').map(|idx| idx + 1) else {
            return;
        };
        if stable_end > self.printed.len() {
            self.clear_pending_marker();
            print!("{}", &projected[self.printed.len()..stable_end]);
            self.printed.push_str(&projected[self.printed.len()..stable_end]);
            self.flush();
        }
    }

    fn print_citations(&mut self, citations: &[Citation]) {
        if citations.is_empty() {
            return;
        }
        let (dim, reset) = if self.use_color {
            (ANSI_DIM, ANSI_RESET)
        } else {
            ("", "")
        };
        println!("{dim}Sources:{reset}");
        for (idx, citation) in citations.iter().enumerate() {
            println!(
                "{dim}  [{}] {} <{}>{reset}",
                idx + 1,
                citation.display_title(),
                citation.uri
            );
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for TerminalSink {
    fn show_placeholder(&mut self, _: SessionId) -> ReplyHandle {
        self.next_handle += 1;
        self.printed.clear();
        self.diverged = false;
        self.show_pending_marker();
        ReplyHandle::new(self.next_handle)
    }

    fn update_content(&mut self, _: ReplyHandle, markup: &str) {
        let projected = project_markup(markup, self.use_color);
        self.print_stable_prefix(&projected);
    }

    fn finalize(&mut self, _: ReplyHandle, markup: &str, citations: &[Citation]) {
        self.clear_pending_marker();
        let projected = project_markup(markup, self.use_color);
        if self.diverged || !projected.starts_with(&self.printed) {
            if !self.printed.is_empty() {
                println!();
            }
            print!("{projected}");
        } else {
            print!("{}", &projected[self.printed.len()..]);
        }
        if !projected.ends_with('\n') {
            println!();
        }
        self.print_citations(citations);
        self.printed.clear();
        self.diverged = false;
        self.flush();
    }

    fn show_error(&mut self, _: ReplyHandle, markup: &str) {
        self.clear_pending_marker();
        if !self.printed.is_empty() && !self.printed.ends_with('\n') {
            println!();
        }
        let text = project_markup(markup, false);
        if self.use_color {
            eprintln!("{ANSI_RED}{}{ANSI_RESET}", text.trim_end());
        } else {
            eprintln!("{}", text.trim_end());
        }
        self.printed.clear();
        self.diverged = false;
    }
}

/// Projects renderer markup to terminal text.
///
/// Unknown tags pass through literally, matching how the renderer passes through text it does not
/// understand.
pub fn project_markup(markup: &str, use_color: bool) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut lists: Vec<Option<usize>> = Vec::new();
    let mut after_list = false;
    let mut rest = markup;
    while !rest.is_empty() {
        let Some(open) = rest.find('<') else {
            out.push_str(rest);
            break;
        };
        if open > 0 {
            out.push_str(&rest[..open]);
            after_list = false;
        }
        let tail = &rest[open..];
        let Some(close) = tail.find('>') else {
            out.push_str(tail);
            break;
        };
        let tag = &tail[..=close];
        match tag {
            "<br>" => {
                if !after_list {
                    out.push('\n');
                }
                after_list = false;
            }
            "<strong>" => {
                if use_color {
                    out.push_str(ANSI_BOLD);
                }
            }
            "</strong>" => {
                if use_color {
                    out.push_str(ANSI_RESET);
                }
            }
            "<ul>" => lists.push(None),
            "<ol>" => lists.push(Some(0)),
            "</ul>" | "</ol>" => {
                lists.pop();
                out.push('\n');
                after_list = true;
            }
            "<li>" => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                let depth = lists.len().max(1);
                out.push_str(&"  ".repeat(depth));
                match lists.last_mut() {
                    Some(Some(counter)) => {
                        *counter += 1;
                        out.push_str(&format!("{counter}. "));
                    }
                    _ => out.push_str("• "),
                }
                after_list = false;
            }
            "</li>" => {}
            other => {
                out.push_str(other);
                after_list = false;
            }
        }
        rest = &tail[close + 1..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::render;

    #[test]
    fn sink_default_has_color() {
        let sink = TerminalSink::new();
        assert!(sink.use_color);
    }

    #[test]
    fn sink_without_color() {
        let sink = TerminalSink::with_color(false);
        assert!(!sink.use_color);
    }

    #[test]
    fn projects_breaks_and_bold() {
        assert_eq!(project_markup(&render("a\n**b**"), false), "a\nb");
        assert_eq!(
            project_markup(&render("**b**"), true),
            format!("{ANSI_BOLD}b{ANSI_RESET}")
        );
    }

    #[test]
    fn projects_lists() {
        assert_eq!(
            project_markup(&render("intro\n- a\n- b\noutro"), false),
            "intro\n  • a\n  • b\noutro"
        );
        assert_eq!(
            project_markup(&render("1. wash\n2. pray"), false),
            "  1. wash\n  2. pray\n"
        );
    }

    #[test]
    fn bare_items_get_bullets() {
        assert_eq!(project_markup("x<br><li>b</li>", false), "x\n  • b");
    }

    #[test]
    fn unknown_tags_pass_through() {
        assert_eq!(project_markup("a <b> c", false), "a <b> c");
        assert_eq!(project_markup("x < y", false), "x < y");
    }

    #[test]
    fn stable_prefix_survives_growing_reply() {
        let mut sink = TerminalSink::with_color(false);
        let handle = sink.show_placeholder(SessionId::new(1));
        sink.update_content(handle, &render("first line"));
        assert!(sink.printed.is_empty());
        sink.update_content(handle, &render("first line\nsec"));
        assert_eq!(sink.printed, "first line\n");
        sink.update_content(handle, &render("first line\nsecond **bo"));
        sink.update_content(handle, &render("first line\nsecond **bold**"));
        assert!(!sink.diverged);
        sink.finalize(handle, &render("first line\nsecond **bold**"), &[]);
        assert!(sink.printed.is_empty());
    }

    #[test]
    fn pending_marker_holds_until_a_line_is_printed() {
        let mut sink = TerminalSink::with_color(false);
        assert!(!sink.pending);
        let handle = sink.show_placeholder(SessionId::new(1));
        assert!(sink.pending);
        sink.update_content(handle, &render("no newline yet"));
        assert!(sink.pending);
        sink.update_content(handle, &render("no newline yet\nsecond"));
        assert!(!sink.pending);
        assert_eq!(sink.printed, "no newline yet\n");
        sink.finalize(handle, &render("no newline yet\nsecond"), &[]);
        assert!(!sink.pending);
    }

    #[test]
    fn pending_marker_clears_on_finalize_and_error() {
        let mut sink = TerminalSink::with_color(true);
        let handle = sink.show_placeholder(SessionId::new(1));
        sink.finalize(handle, &render("short"), &[]);
        assert!(!sink.pending);

        let handle = sink.show_placeholder(SessionId::new(1));
        assert!(sink.pending);
        sink.show_error(handle, "stream failed");
        assert!(!sink.pending);
    }

    #[test]
    fn recording_sink_tracks_calls() {
        let mut sink = RecordingSink::new();
        let handle = sink.show_placeholder(SessionId::new(3));
        sink.update_content(handle, "a");
        sink.update_content(handle, "ab");
        sink.finalize(handle, "ab", &[]);
        assert_eq!(sink.updates(), vec!["a", "ab"]);
        assert_eq!(sink.finalized(), Some("ab"));
        assert_eq!(sink.error(), None);
    }
}
