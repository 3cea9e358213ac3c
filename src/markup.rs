//! Minimal markup renderer for generated text.
//!
//! [`render`] turns raw response text into HTML-like markup. It is total and pure: malformed
//! input is passed through as literal text, never rejected. The transform runs as a fixed
//! sequence of passes over lines, each pass seeing the output of the one before:
//!
//! 1. `**bold**` spans become `<strong>` (non-greedy, never across a line break).
//! 2. Lines starting with `*`, `|` or `-` plus whitespace become unordered list items.
//! 3. Consecutive unordered items merge into one run wrapped in `<ul>`.
//! 4. Lines starting with `<digits>.` plus whitespace become ordered items, merged into `<ol>`.
//! 5. Remaining line breaks become `<br>`.
//!
//! The output is markup, not input text; rendering it a second time is not meaningful.

/// How list runs are wrapped in their list container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListWrapping {
    /// Every contiguous run gets its own container.
    #[default]
    EveryRun,
    /// Only the first run of each list kind is wrapped; later runs keep bare items.
    ///
    /// This reproduces how older stored conversations were rendered.
    FirstRunOnly,
}

/// Render `text` to markup wrapping every list run.
pub fn render(text: &str) -> String {
    render_with(text, ListWrapping::EveryRun)
}

/// Render `text` to markup with an explicit list wrapping policy.
pub fn render_with(text: &str, wrapping: ListWrapping) -> String {
    let lines: Vec<Line> = text
        .split('\n')
        .map(|line| Line::Text(embolden(line)))
        .collect();
    let lines = mark_items(lines, ListKind::Unordered);
    let blocks = group_runs(lines, ListKind::Unordered, wrapping);
    let blocks = mark_ordered(blocks);
    let blocks = regroup_ordered(blocks, wrapping);
    let mut out = String::with_capacity(text.len() + 16);
    for (idx, block) in blocks.iter().enumerate() {
        if idx > 0 {
            out.push_str("<br>");
        }
        block.write_to(&mut out);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn tags(self) -> (&'static str, &'static str) {
        match self {
            ListKind::Unordered => ("<ul>", "</ul>"),
            ListKind::Ordered => ("<ol>", "</ol>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Text(String),
    Item(ListKind, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Line(Line),
    List {
        kind: ListKind,
        items: Vec<String>,
        wrapped: bool,
    },
}

impl Block {
    fn write_to(&self, out: &mut String) {
        match self {
            Block::Line(Line::Text(text)) => out.push_str(text),
            Block::Line(Line::Item(_, body)) => push_item(out, body),
            Block::List {
                kind,
                items,
                wrapped,
            } => {
                let (open, close) = kind.tags();
                if *wrapped {
                    out.push_str(open);
                }
                for item in items {
                    push_item(out, item);
                }
                if *wrapped {
                    out.push_str(close);
                }
            }
        }
    }
}

fn push_item(out: &mut String, body: &str) {
    out.push_str("<li>");
    out.push_str(body);
    out.push_str("</li>");
}

/// Replace each `**...**` pair on a single line with `<strong>...</strong>`.
fn embolden(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str("<strong>");
        out.push_str(&after_open[..close]);
        out.push_str("</strong>");
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    out
}

/// Returns the item body if `line` opens with one of `*`, `|`, `-` followed by whitespace.
fn unordered_body(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let marker = chars.next()?;
    if !matches!(marker, '*' | '|' | '-') {
        return None;
    }
    let rest = chars.as_str();
    let body = rest.trim_start();
    if body.len() == rest.len() {
        return None;
    }
    Some(body)
}

/// Returns the item body if `line` opens with `<digits>.` followed by whitespace.
fn ordered_body(line: &str) -> Option<&str> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    let body = rest.trim_start();
    if body.len() == rest.len() {
        return None;
    }
    Some(body)
}

fn mark_items(lines: Vec<Line>, kind: ListKind) -> Vec<Line> {
    lines
        .into_iter()
        .map(|line| match line {
            Line::Text(text) => {
                let body = match kind {
                    ListKind::Unordered => unordered_body(&text),
                    ListKind::Ordered => ordered_body(&text),
                };
                match body {
                    Some(body) => Line::Item(kind, body.to_string()),
                    None => Line::Text(text),
                }
            }
            item => item,
        })
        .collect()
}

/// Merge consecutive items of `kind` into list blocks.
fn group_runs(lines: Vec<Line>, kind: ListKind, wrapping: ListWrapping) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(lines.len());
    let mut runs_seen = 0usize;
    let mut in_run = false;
    for line in lines {
        match line {
            Line::Item(item_kind, body) if item_kind == kind => {
                if in_run && let Some(Block::List { items, .. }) = blocks.last_mut() {
                    items.push(body);
                    continue;
                }
                let wrapped = match wrapping {
                    ListWrapping::EveryRun => true,
                    ListWrapping::FirstRunOnly => runs_seen == 0,
                };
                runs_seen += 1;
                in_run = true;
                blocks.push(Block::List {
                    kind,
                    items: vec![body],
                    wrapped,
                });
            }
            other => {
                in_run = false;
                blocks.push(Block::Line(other));
            }
        }
    }
    blocks
}

fn mark_ordered(blocks: Vec<Block>) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|block| match block {
            Block::Line(line) => {
                let mut marked = mark_items(vec![line], ListKind::Ordered);
                match marked.pop() {
                    Some(line) => Block::Line(line),
                    None => Block::Line(Line::Text(String::new())),
                }
            }
            list => list,
        })
        .collect()
}

fn regroup_ordered(blocks: Vec<Block>, wrapping: ListWrapping) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
    let mut pending: Vec<Line> = Vec::new();
    for block in blocks {
        match block {
            Block::Line(line) => pending.push(line),
            list => {
                out.extend(group_runs(std::mem::take(&mut pending), ListKind::Ordered, wrapping));
                out.push(list);
            }
        }
    }
    out.extend(group_runs(pending, ListKind::Ordered, wrapping));
    if wrapping == ListWrapping::FirstRunOnly {
        let mut first = true;
        for block in out.iter_mut() {
            if let Block::List {
                kind: ListKind::Ordered,
                wrapped,
                ..
            } = block
            {
                *wrapped = first;
                first = false;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_span() {
        assert_eq!(render("**x**"), "<strong>x</strong>");
    }

    #[test]
    fn unmatched_bold_is_literal() {
        assert_eq!(render("**x"), "**x");
        assert_eq!(render("a **b** c **d"), "a <strong>b</strong> c **d");
    }

    #[test]
    fn bold_is_non_greedy() {
        assert_eq!(
            render("**a** and **b**"),
            "<strong>a</strong> and <strong>b</strong>"
        );
        assert_eq!(render("****"), "<strong></strong>");
    }

    #[test]
    fn bold_never_spans_lines() {
        assert_eq!(render("**a\nb**"), "**a<br>b**");
    }

    #[test]
    fn dash_list_is_one_wrapper() {
        assert_eq!(
            render("- a\n- b\n- c"),
            "<ul><li>a</li><li>b</li><li>c</li></ul>"
        );
    }

    #[test]
    fn star_and_pipe_markers() {
        assert_eq!(render("* a\n| b"), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn marker_needs_whitespace() {
        assert_eq!(render("-a\n*b"), "-a<br>*b");
    }

    #[test]
    fn bold_inside_items() {
        assert_eq!(
            render("* **Note** one\n* two"),
            "<ul><li><strong>Note</strong> one</li><li>two</li></ul>"
        );
    }

    #[test]
    fn ordered_list() {
        assert_eq!(
            render("Steps:\n1. wash\n2. pray"),
            "Steps:<br><ol><li>wash</li><li>pray</li></ol>"
        );
        assert_eq!(render("1.5 litres"), "1.5 litres");
    }

    #[test]
    fn lists_and_text_separated_by_breaks() {
        assert_eq!(
            render("intro\n- a\n- b\noutro"),
            "intro<br><ul><li>a</li><li>b</li></ul><br>outro"
        );
    }

    #[test]
    fn every_run_wrapped_by_default() {
        assert_eq!(
            render("- a\ntext\n- b"),
            "<ul><li>a</li></ul><br>text<br><ul><li>b</li></ul>"
        );
    }

    #[test]
    fn first_run_only_leaves_later_runs_bare() {
        assert_eq!(
            render_with("- a\ntext\n- b", ListWrapping::FirstRunOnly),
            "<ul><li>a</li></ul><br>text<br><li>b</li>"
        );
        assert_eq!(
            render_with("1. a\nx\n2. b", ListWrapping::FirstRunOnly),
            "<ol><li>a</li></ol><br>x<br><li>b</li>"
        );
    }

    #[test]
    fn arabic_text_passes_through() {
        assert_eq!(render("اللهم صل وسلم"), "اللهم صل وسلم");
        assert_eq!(render("**السلام**"), "<strong>السلام</strong>");
    }

    #[test]
    fn empty_input() {
        assert_eq!(render(""), "");
        assert_eq!(render("\n"), "<br>");
    }
}
