//! Session title inference.

/// Titles longer than this many characters are truncated.
pub const TITLE_MAX_CHARS: usize = 30;

/// Appended to a truncated title.
pub const TITLE_ELLIPSIS: &str = "...";

/// Derive a session title from its first user message.
///
/// The first [`TITLE_MAX_CHARS`] characters are kept, followed by [`TITLE_ELLIPSIS`] when
/// anything was cut. Characters are Unicode scalar values, so Arabic and Latin text truncate
/// alike.
pub fn infer_title(first_message: &str) -> String {
    match first_message.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => {
            let mut title = first_message[..cut].to_string();
            title.push_str(TITLE_ELLIPSIS);
            title
        }
        None => first_message.to_string(),
    }
}
