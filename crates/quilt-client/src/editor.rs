//! Editor surface abstraction.
//!
//! The pipeline never talks to a concrete widget. It consumes
//! [`ChangeEvent`]s describing edits that have just been applied to some
//! text surface, and applies remote edits back through the same surface.
//! [`TextBuffer`] is the headless implementation the CLI and the tests
//! run against.

use quilt_crdt::ElementId;
use serde::Serialize;

/// A (line, column) coordinate. Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// Who caused an edit. Remote origins are tagged with the element id
/// that was already integrated into the chain, so the pipeline only
/// updates the positional mapping and never re-transmits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChangeOrigin {
    /// A single keystroke.
    Input,
    /// A multi-character or multi-line paste.
    Paste,
    /// A deletion, single cell or spanning.
    Delete,
    /// A programmatic edit the pipeline must not react to.
    Ignore,
    /// Echo of a remote insert already present in the chain.
    RemoteInput(ElementId),
    /// Echo of a remote delete already tombstoned in the chain.
    RemoteDelete(ElementId),
}

/// An edit span. `inserted` and `removed` are per-line fragments: a
/// plain keystroke is `["x"]`, a line break is `["", ""]`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub from: Pos,
    pub to: Pos,
    pub inserted: Vec<String>,
    pub removed: Vec<String>,
    pub origin: ChangeOrigin,
}

/// The seam between the pipeline and whatever renders the text.
pub trait EditorSurface {
    /// Replace the span `[from, to)` with `text`, returning the event
    /// describing what happened so it can be fed to the pipeline.
    fn apply_edit(&mut self, text: &str, from: Pos, to: Pos, origin: ChangeOrigin) -> ChangeEvent;

    fn text(&self) -> String;

    fn line(&self, line: usize) -> Option<&str>;

    fn line_count(&self) -> usize;

    /// Position just past the last character of the buffer.
    fn end(&self) -> Pos;
}

/// Headless line-based buffer. Always holds at least one (possibly
/// empty) line, matching how editors model an empty document.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    pub fn new() -> Self {
        Self {
            lines: vec![String::new()],
        }
    }

    fn byte_of(line: &str, col: usize) -> usize {
        line.char_indices()
            .nth(col)
            .map(|(i, _)| i)
            .unwrap_or(line.len())
    }

    fn removed_span(&self, from: Pos, to: Pos) -> Vec<String> {
        if from == to {
            return vec![String::new()];
        }
        if from.line == to.line {
            let line = &self.lines[from.line];
            let (bf, bt) = (Self::byte_of(line, from.col), Self::byte_of(line, to.col));
            return vec![line[bf..bt].to_string()];
        }
        let mut removed = Vec::with_capacity(to.line - from.line + 1);
        let first = &self.lines[from.line];
        removed.push(first[Self::byte_of(first, from.col)..].to_string());
        for line in &self.lines[from.line + 1..to.line] {
            removed.push(line.clone());
        }
        let last = &self.lines[to.line];
        removed.push(last[..Self::byte_of(last, to.col)].to_string());
        removed
    }
}

impl EditorSurface for TextBuffer {
    fn apply_edit(&mut self, text: &str, from: Pos, to: Pos, origin: ChangeOrigin) -> ChangeEvent {
        while self.lines.len() <= to.line.max(from.line) {
            self.lines.push(String::new());
        }
        let removed = self.removed_span(from, to);

        if from != to {
            if from.line == to.line {
                let line = &mut self.lines[from.line];
                let (bf, bt) = (Self::byte_of(line, from.col), Self::byte_of(line, to.col));
                line.replace_range(bf..bt, "");
            } else {
                let last = &self.lines[to.line];
                let tail = last[Self::byte_of(last, to.col)..].to_string();
                self.lines.drain(from.line + 1..=to.line);
                let first = &mut self.lines[from.line];
                let bf = Self::byte_of(first, from.col);
                first.truncate(bf);
                first.push_str(&tail);
            }
        }

        let segments: Vec<&str> = text.split('\n').collect();
        if segments.len() == 1 {
            if !text.is_empty() {
                let line = &mut self.lines[from.line];
                let bf = Self::byte_of(line, from.col);
                line.insert_str(bf, text);
            }
        } else {
            let line = &mut self.lines[from.line];
            let bf = Self::byte_of(line, from.col);
            let tail = line[bf..].to_string();
            line.truncate(bf);
            line.push_str(segments[0]);
            let mut at = from.line + 1;
            for segment in &segments[1..segments.len() - 1] {
                self.lines.insert(at, segment.to_string());
                at += 1;
            }
            let mut last = segments[segments.len() - 1].to_string();
            last.push_str(&tail);
            self.lines.insert(at, last);
        }

        ChangeEvent {
            from,
            to,
            inserted: segments.into_iter().map(str::to_string).collect(),
            removed,
            origin,
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn line(&self, line: usize) -> Option<&str> {
        self.lines.get(line).map(String::as_str)
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn end(&self) -> Pos {
        let line = self.lines.len() - 1;
        Pos::new(line, self.lines[line].chars().count())
    }
}
