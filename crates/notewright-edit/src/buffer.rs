//! Text buffer abstraction the edit executor mutates.
//!
//! Every higher-level edit is expressed through [`TextBuffer::replace_range`]
//! plus the read accessors, so any editor that can address lines and
//! characters can host the protocol.

use serde::{Deserialize, Serialize};

/// A line/character address. `ch` counts chars, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub ch: usize,
}

impl Position {
    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }
}

/// A selection between an anchor and a head, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub head: Position,
}

impl Selection {
    pub fn new(anchor: Position, head: Position) -> Self {
        Self { anchor, head }
    }

    pub fn from(&self) -> Position {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> Position {
        self.anchor.max(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }
}

/// Mutable, line-addressable document with a cursor and an optional selection.
pub trait TextBuffer {
    /// Number of lines; an empty document has one empty line.
    fn line_count(&self) -> usize;

    /// Text of line `n` without its terminator.
    fn line(&self, n: usize) -> Option<String>;

    fn cursor(&self) -> Position;

    fn set_cursor(&mut self, pos: Position);

    /// Current selection, if any. An empty selection is reported as `None`
    /// by well-behaved implementations, but callers still check.
    fn selection(&self) -> Option<Selection>;

    /// Replaces the text between `from` and `to` (clamped to the document)
    /// with `text`.
    fn replace_range(&mut self, text: &str, from: Position, to: Position);

    fn last_line(&self) -> usize {
        self.line_count().saturating_sub(1)
    }

    fn line_len(&self, n: usize) -> usize {
        self.line(n).map(|l| l.chars().count()).unwrap_or(0)
    }

    /// Position just past the final character of the document.
    fn end(&self) -> Position {
        let last = self.last_line();
        Position::new(last, self.line_len(last))
    }

    fn content(&self) -> String {
        (0..self.line_count())
            .filter_map(|n| self.line(n))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn selected_text(&self) -> String {
        match self.selection() {
            Some(sel) if !sel.is_empty() => text_between(&self.content(), sel.from(), sel.to()),
            _ => String::new(),
        }
    }
}

/// Converts a char offset into `text` to a position.
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let mut line = 0;
    let mut ch = 0;
    for c in text.chars().take(offset) {
        if c == '\n' {
            line += 1;
            ch = 0;
        } else {
            ch += 1;
        }
    }
    Position::new(line, ch)
}

/// Converts a position to a char offset into `text`, clamping past-the-end
/// lines and columns.
pub fn position_to_offset(text: &str, pos: Position) -> usize {
    let mut offset = 0;
    for (idx, line) in text.split('\n').enumerate() {
        let len = line.chars().count();
        if idx == pos.line {
            return offset + pos.ch.min(len);
        }
        offset += len + 1;
    }
    text.chars().count()
}

fn text_between(text: &str, from: Position, to: Position) -> String {
    let start = position_to_offset(text, from);
    let end = position_to_offset(text, to);
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// In-memory [`TextBuffer`] backed by a vector of lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBuffer {
    lines: Vec<String>,
    cursor: Position,
    selection: Option<Selection>,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::from_text("")
    }
}

impl MemoryBuffer {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
            cursor: Position::default(),
            selection: None,
        }
    }

    pub fn with_cursor(mut self, pos: Position) -> Self {
        self.cursor = self.clamp(pos);
        self
    }

    pub fn with_selection(mut self, anchor: Position, head: Position) -> Self {
        self.set_selection(Some(Selection::new(anchor, head)));
        self
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection
            .map(|s| Selection::new(self.clamp(s.anchor), self.clamp(s.head)))
            .filter(|s| !s.is_empty());
    }

    fn clamp(&self, pos: Position) -> Position {
        let line = pos.line.min(self.lines.len().saturating_sub(1));
        let len = self.lines.get(line).map(|l| l.chars().count()).unwrap_or(0);
        Position::new(line, pos.ch.min(len))
    }
}

impl TextBuffer for MemoryBuffer {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, n: usize) -> Option<String> {
        self.lines.get(n).cloned()
    }

    fn cursor(&self) -> Position {
        self.cursor
    }

    fn set_cursor(&mut self, pos: Position) {
        self.cursor = self.clamp(pos);
    }

    fn selection(&self) -> Option<Selection> {
        self.selection
    }

    fn replace_range(&mut self, text: &str, from: Position, to: Position) {
        let (from, to) = (self.clamp(from.min(to)), self.clamp(from.max(to)));
        let content = self.lines.join("\n");
        let start = position_to_offset(&content, from);
        let end = position_to_offset(&content, to);

        let mut updated: String = content.chars().take(start).collect();
        updated.push_str(text);
        updated.extend(content.chars().skip(end));
        self.lines = updated.split('\n').map(str::to_string).collect();

        // Editors collapse the selection and park the cursor after the insert.
        self.selection = None;
        self.cursor = offset_to_position(&updated, start + text.chars().count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_has_one_line() {
        let buf = MemoryBuffer::default();
        assert_eq!(buf.line_count(), 1);
        assert_eq!(buf.line(0).as_deref(), Some(""));
        assert_eq!(buf.end(), Position::new(0, 0));
    }

    #[test]
    fn test_replace_range_across_lines() {
        let mut buf = MemoryBuffer::from_text("alpha\nbeta\ngamma");
        buf.replace_range("X", Position::new(0, 2), Position::new(2, 1));
        assert_eq!(buf.content(), "alXamma");
        assert_eq!(buf.cursor(), Position::new(0, 3));
    }

    #[test]
    fn test_replace_range_inserts_newlines() {
        let mut buf = MemoryBuffer::from_text("one");
        let end = buf.end();
        buf.replace_range("\ntwo\nthree", end, end);
        assert_eq!(buf.line_count(), 3);
        assert_eq!(buf.line(2).as_deref(), Some("three"));
    }

    #[test]
    fn test_selected_text_is_direction_independent() {
        let buf = MemoryBuffer::from_text("hello world")
            .with_selection(Position::new(0, 11), Position::new(0, 6));
        assert_eq!(buf.selected_text(), "world");
    }

    #[test]
    fn test_empty_selection_is_dropped() {
        let buf = MemoryBuffer::from_text("abc")
            .with_selection(Position::new(0, 1), Position::new(0, 1));
        assert!(buf.selection().is_none());
    }

    #[test]
    fn test_multibyte_columns_are_chars() {
        let mut buf = MemoryBuffer::from_text("héllo");
        buf.replace_range("E", Position::new(0, 1), Position::new(0, 2));
        assert_eq!(buf.content(), "hEllo");
    }

    #[test]
    fn test_offset_position_conversions() {
        let text = "ab\ncd\n";
        assert_eq!(offset_to_position(text, 4), Position::new(1, 1));
        assert_eq!(position_to_offset(text, Position::new(1, 1)), 4);
        assert_eq!(position_to_offset(text, Position::new(9, 0)), 6);
    }
}
