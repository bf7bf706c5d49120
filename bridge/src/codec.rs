//! Newline-delimited JSON framing for helper communication.
//!
//! Requests go out as a single `{json}\n` line. Helper output is collected
//! into a [`LineBuffer`] and handed back one complete line at a time; the
//! stream may interleave JSON-RPC messages with arbitrary log text, so the
//! buffer never interprets content, it only splits on `\n`.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Maximum unterminated line length (4 MiB) kept in memory.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Writes newline-terminated JSON messages to an async writer.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg` compactly, terminate it with `\n`, and flush.
    ///
    /// Struct fields go out in declaration order.
    pub async fn write_line<T: Serialize + ?Sized>(&mut self, msg: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(msg).map_err(io::Error::other)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Give back the underlying writer (dropping it closes a pipe).
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Append-only accumulator that yields complete lines.
///
/// Only bytes appended since the previous scan are searched for a newline,
/// so a long partial line is not rescanned on every read.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Offset into `buf` up to which no `\n` exists.
    scanned: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, without its `\n` (and trailing `\r`).
    ///
    /// Lines longer than the configured maximum are dropped whole.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(rel) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_line {
                    tracing::warn!(
                        bytes = self.buf.len(),
                        "Discarding oversized helper output line"
                    );
                    self.buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                return None;
            };

            let end = self.scanned + rel;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if self.discarding {
                // Tail of a line whose head was already dropped.
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_line {
                tracing::warn!(bytes = line.len(), "Discarding oversized helper output line");
                continue;
            }
            return Some(line);
        }
    }

    /// Take whatever unterminated bytes remain (used once the stream hits EOF).
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        let discarding = std::mem::take(&mut self.discarding);
        let rest = std::mem::take(&mut self.buf);
        if discarding || rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(rest)
    }

    /// Bytes currently buffered (unterminated tail).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_line_is_single_terminated_line() {
        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 7, "params": {"note": "a\nb"}});
        let mut buf = Vec::new();
        let mut writer = LineWriter::new(&mut buf);
        writer.write_line(&msg).await.unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        // Embedded newlines are escaped, so the frame is exactly one line.
        assert_eq!(text.matches('\n').count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[tokio::test]
    async fn test_request_line_keeps_field_order() {
        let args = serde_json::json!({"patientId": "p-1"});
        let request = crate::protocol::tool_call(1, "generate_prescription", &args);
        let mut buf = Vec::new();
        LineWriter::new(&mut buf).write_line(&request).await.unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","#,
                r#""params":{"name":"generate_prescription","arguments":{"patientId":"p-1"}}}"#,
                "\n"
            )
        );
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut lb = LineBuffer::new();
        lb.extend(b"{\"id\":");
        assert!(lb.next_line().is_none());
        lb.extend(b"1}\nnoise\n{\"id\"");
        assert_eq!(lb.next_line().unwrap(), b"{\"id\":1}");
        assert_eq!(lb.next_line().unwrap(), b"noise");
        assert!(lb.next_line().is_none());
        assert_eq!(lb.pending(), 5);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut lb = LineBuffer::new();
        lb.extend(b"hello\r\n");
        assert_eq!(lb.next_line().unwrap(), b"hello");
    }

    #[test]
    fn test_remainder_returned_at_eof() {
        let mut lb = LineBuffer::new();
        lb.extend(b"first\n{\"id\":2}");
        assert_eq!(lb.next_line().unwrap(), b"first");
        assert!(lb.next_line().is_none());
        assert_eq!(lb.take_remainder().unwrap(), b"{\"id\":2}");
        assert!(lb.take_remainder().is_none());
    }

    #[test]
    fn test_whitespace_remainder_is_none() {
        let mut lb = LineBuffer::new();
        lb.extend(b"  \t");
        assert!(lb.take_remainder().is_none());
    }

    #[test]
    fn test_oversized_line_is_dropped_and_stream_recovers() {
        let mut lb = LineBuffer::with_max_line(8);
        lb.extend(b"0123456789abcdef");
        assert!(lb.next_line().is_none());
        assert_eq!(lb.pending(), 0);
        lb.extend(b"tail\nok\n");
        // "tail" belongs to the dropped line.
        assert_eq!(lb.next_line().unwrap(), b"ok");
        assert!(lb.next_line().is_none());
    }

    #[test]
    fn test_oversized_complete_line_is_dropped() {
        let mut lb = LineBuffer::with_max_line(4);
        lb.extend(b"toolong\nok\n");
        assert_eq!(lb.next_line().unwrap(), b"ok");
    }

    #[test]
    fn test_empty_lines_are_yielded() {
        let mut lb = LineBuffer::new();
        lb.extend(b"\n\nx\n");
        assert_eq!(lb.next_line().unwrap(), b"");
        assert_eq!(lb.next_line().unwrap(), b"");
        assert_eq!(lb.next_line().unwrap(), b"x");
    }
}
