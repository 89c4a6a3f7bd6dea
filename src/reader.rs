//! Character source with pushback, position tracking and a diagnostic snippet.

use std::collections::VecDeque;
use std::io::Read;

use crate::error::{JsonIoError, Result, SyntaxErrorKind};
use crate::span::Position;

const READ_CHUNK: usize = 8192;
const REMEMBERED_LINE_ENDS: usize = 8;

/// Reads UTF-8 characters from any [`Read`] and allows characters to be pushed back.
///
/// Line and column counters move forward on [`read`](Self::read) and backward on
/// [`unread`](Self::unread), so a pushed-back character leaves the position exactly where it
/// was before it was read. The last `snippet_len` characters are kept for error messages.
pub struct PushbackReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    pushback: Vec<char>,
    line: usize,
    col: usize,
    line_ends: VecDeque<usize>,
    snippet: VecDeque<char>,
    snippet_len: usize,
}

impl<'a> PushbackReader<&'a [u8]> {
    /// Reader over an in-memory string.
    pub fn from_str(input: &'a str, snippet_len: usize) -> Self {
        Self::new(input.as_bytes(), snippet_len)
    }
}

impl<R: Read> PushbackReader<R> {
    /// Wrap a byte stream.
    pub fn new(inner: R, snippet_len: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            pos: 0,
            len: 0,
            pushback: Vec::with_capacity(4),
            line: 1,
            col: 0,
            line_ends: VecDeque::with_capacity(REMEMBERED_LINE_ENDS),
            snippet: VecDeque::with_capacity(snippet_len.min(1024)),
            snippet_len,
        }
    }

    /// Current position (of the last character read).
    pub fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    /// The most recently read characters, oldest first.
    pub fn snippet(&self) -> String {
        self.snippet.iter().collect()
    }

    /// Build a syntax error at the current position.
    pub fn error(&self, kind: SyntaxErrorKind) -> JsonIoError {
        JsonIoError::syntax(kind, self.position(), self.snippet())
    }

    /// Read the next character, `None` at end of input.
    pub fn read(&mut self) -> Result<Option<char>> {
        let c = match self.pushback.pop() {
            Some(c) => c,
            None => match self.decode()? {
                Some(c) => c,
                None => return Ok(None),
            },
        };
        self.advance(c);
        Ok(Some(c))
    }

    /// Push a character back so the next [`read`](Self::read) returns it again.
    pub fn unread(&mut self, c: char) {
        if c == '\n' {
            self.line = self.line.saturating_sub(1).max(1);
            self.col = self.line_ends.pop_back().unwrap_or(0);
        } else {
            self.col = self.col.saturating_sub(1);
        }
        self.snippet.pop_back();
        self.pushback.push(c);
    }

    fn advance(&mut self, c: char) {
        if c == '\n' {
            if self.line_ends.len() == REMEMBERED_LINE_ENDS {
                self.line_ends.pop_front();
            }
            self.line_ends.push_back(self.col);
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        if self.snippet_len > 0 {
            if self.snippet.len() == self.snippet_len {
                self.snippet.pop_front();
            }
            self.snippet.push_back(c);
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.pos == self.len {
            self.len = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.error(SyntaxErrorKind::Io(e.to_string()))),
                }
            };
            self.pos = 0;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn decode(&mut self) -> Result<Option<char>> {
        let Some(first) = self.next_byte()? else {
            return Ok(None);
        };
        if first.is_ascii() {
            return Ok(Some(first as char));
        }
        let width = match first {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(self.invalid_utf8()),
        };
        let mut bytes = [first, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            *slot = match self.next_byte()? {
                Some(b) => b,
                None => return Err(self.error(SyntaxErrorKind::UnexpectedEof("UTF-8 sequence"))),
            };
        }
        core::str::from_utf8(&bytes[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Some)
            .ok_or_else(|| self.invalid_utf8())
    }

    fn invalid_utf8(&self) -> JsonIoError {
        self.error(SyntaxErrorKind::Io("stream did not contain valid UTF-8".to_string()))
    }
}
