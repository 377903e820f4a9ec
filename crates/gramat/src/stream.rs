use std::path::Path;

use crate::error::GrammarError;

/// Positioned iteration over the characters of a buffered input, with a
/// LIFO marker stack for backtracking.
///
/// Positions are byte offsets into the source so they can be turned into
/// [`Span`](crate::span::Span)s directly; `advance` still moves over whole
/// characters.
#[derive(Clone)]
pub struct CharCursor<'a> {
    src: &'a str,
    position: u32,
    marks: Vec<u32>,
}

impl<'a> CharCursor<'a> {
    pub fn new(src: &'a str) -> CharCursor<'a> {
        assert!(u32::try_from(src.len()).is_ok(), "Input too large");
        CharCursor {
            src,
            position: 0,
            marks: Vec::new(),
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn at_end(&self) -> bool {
        self.position as usize == self.src.len()
    }

    /// The current character, or `None` at end of input.
    pub fn peek(&self) -> Option<char> {
        self.src[self.position as usize..].chars().next()
    }

    /// Consumes the character returned by the last `peek`.
    pub fn bump(&mut self, c: char) {
        debug_assert_eq!(self.peek(), Some(c));
        self.position += c.len_utf8() as u32;
    }

    /// Advances over `count` whole characters, stopping early at end of
    /// input.
    pub fn advance(&mut self, count: usize) {
        for _ in 0..count {
            match self.peek() {
                Some(c) => self.bump(c),
                None => break,
            }
        }
    }

    pub fn save(&mut self) {
        self.marks.push(self.position);
    }

    /// Pops the innermost marker and moves back to it.
    ///
    /// Panics if no marker is on the stack; an unbalanced save/revert pair
    /// is a programming error in the matcher, not an input condition.
    pub fn revert(&mut self) {
        let mark = self.marks.pop().expect("No positions are currently marked");
        self.position = mark;
    }

    /// Pops the innermost marker without moving.
    pub fn discard_mark(&mut self) {
        self.marks.pop().expect("No positions are currently marked");
    }

    pub fn src(&self) -> &'a str {
        self.src
    }
}

/// A file-sourced input, buffered up front. Thin adapter so file parsing
/// goes through the same cursor as in-memory parsing.
pub struct Source {
    text: String,
}

impl Source {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Source, GrammarError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Source { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> CharCursor<'_> {
        CharCursor::new(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_move() {
        let c = CharCursor::new("ab");
        assert_eq!(c.peek(), Some('a'));
        assert_eq!(c.peek(), Some('a'));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn save_revert_restores_position() {
        let mut c = CharCursor::new("abc");
        c.advance(1);
        c.save();
        c.advance(2);
        assert!(c.at_end());
        c.revert();
        assert_eq!(c.position(), 1);
        assert_eq!(c.peek(), Some('b'));
    }

    #[test]
    fn discard_keeps_position() {
        let mut c = CharCursor::new("abc");
        c.save();
        c.advance(2);
        c.discard_mark();
        assert_eq!(c.position(), 2);
    }

    #[test]
    fn advance_stops_at_end() {
        let mut c = CharCursor::new("a");
        c.advance(5);
        assert!(c.at_end());
        assert_eq!(c.peek(), None);
    }

    #[test]
    fn multibyte_positions_are_byte_offsets() {
        let mut c = CharCursor::new("éx");
        c.advance(1);
        assert_eq!(c.position(), 2);
        assert_eq!(c.peek(), Some('x'));
    }

    #[test]
    #[should_panic(expected = "No positions are currently marked")]
    fn revert_without_save_panics() {
        let mut c = CharCursor::new("a");
        c.revert();
    }
}
