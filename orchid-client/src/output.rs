//! Streaming output reader
//!
//! The server sends an execution's output as a chunked `text/plain` body, one
//! output line per `\n`-terminated line, closed by exactly one sentinel line.
//! A body that ends before the sentinel is reported as
//! [`ClientError::IncompleteStream`]. Content lines arrive escaped the same
//! way they are stored and are unescaped here.

use orchid_core::output::{Sentinel, unescape_line};
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// Splits an incoming byte stream into complete lines
///
/// Bytes after the last `\n` are held back until the rest of the line arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Takes the next complete line, without its `\n`
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes received that do not yet form a complete line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Output lines of one execution, read from a streaming response
pub struct OutputLines {
    execution_id: Uuid,
    response: reqwest::Response,
    buffer: LineBuffer,
    sentinel: Option<Sentinel>,
}

impl OutputLines {
    pub(crate) fn new(execution_id: Uuid, response: reqwest::Response) -> Self {
        Self {
            execution_id,
            response,
            buffer: LineBuffer::new(),
            sentinel: None,
        }
    }

    /// Reads the next output line
    ///
    /// Returns `Ok(None)` once the terminal sentinel has been received; the
    /// sentinel itself is never returned as a line.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        if self.sentinel.is_some() {
            return Ok(None);
        }

        loop {
            if let Some(line) = self.buffer.next_line() {
                if let Some(sentinel) = Sentinel::parse(&line) {
                    self.sentinel = Some(sentinel);
                    return Ok(None);
                }
                return Ok(Some(unescape_line(&line).into_owned()));
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.push(&chunk),
                None => return Err(ClientError::IncompleteStream(self.execution_id)),
            }
        }
    }

    /// The sentinel that ended the stream, once reached
    pub fn sentinel(&self) -> Option<Sentinel> {
        self.sentinel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_complete_lines() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"compiling\ntesting\n");

        assert_eq!(buffer.next_line().as_deref(), Some("compiling"));
        assert_eq!(buffer.next_line().as_deref(), Some("testing"));
        assert_eq!(buffer.next_line(), None);
    }

    #[test]
    fn test_holds_partial_line() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"compil");
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.pending_len(), 6);

        buffer.push(b"ing\n-----Fin");
        assert_eq!(buffer.next_line().as_deref(), Some("compiling"));
        assert_eq!(buffer.next_line(), None);

        buffer.push(b"ished-----\n");
        let last = buffer.next_line().unwrap();
        assert_eq!(Sentinel::parse(&last), Some(Sentinel::Finished));
    }

    #[test]
    fn test_keeps_empty_lines() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"\n\nx\n");

        assert_eq!(buffer.next_line().as_deref(), Some(""));
        assert_eq!(buffer.next_line().as_deref(), Some(""));
        assert_eq!(buffer.next_line().as_deref(), Some("x"));
    }
}
