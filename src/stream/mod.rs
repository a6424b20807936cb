//! Chunked line reader with custom terminators
//!
//! Agents report progress with bare carriage returns as well as newlines.
//! [`TerminatedLines`] splits any `AsyncRead` on a configurable set of
//! terminator bytes and yields lines as soon as they are complete:
//!
//! - every terminator byte ends exactly one line, so `"\r\n"` yields an
//!   empty line after the `\r`-terminated one
//! - a non-empty unterminated tail is yielded at end of stream, an empty one
//!   is not
//! - after end of stream the sequence stays finished
//!
//! `next_line` is cancel safe: dropping its future between polls loses no
//! data, so it can sit in a `tokio::select!` arm.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Default terminators: newline and carriage return
pub const PROGRESS_TERMINATORS: &[u8] = b"\n\r";

const CHUNK_SIZE: usize = 8 * 1024;

/// Lazy, finite sequence of lines read from `R`
pub struct TerminatedLines<R> {
    reader: R,
    terminators: Vec<u8>,
    chunk: Box<[u8]>,
    pos: usize,
    filled: usize,
    pending: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> TerminatedLines<R> {
    /// Split on `\n` and `\r`
    pub fn new(reader: R) -> Self {
        Self::with_terminators(reader, PROGRESS_TERMINATORS)
    }

    pub fn with_terminators(reader: R, terminators: &[u8]) -> Self {
        Self {
            reader,
            terminators: terminators.to_vec(),
            chunk: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Whether end of stream has been reached and everything yielded
    pub fn is_finished(&self) -> bool {
        self.finished && self.pos >= self.filled && self.pending.is_empty()
    }

    /// Next complete line, `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            while self.pos < self.filled {
                let byte = self.chunk[self.pos];
                self.pos += 1;
                if self.terminators.contains(&byte) {
                    return Ok(Some(self.take_pending()));
                }
                self.pending.push(byte);
            }

            if self.finished {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.finished = true;
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_pending()));
            }
            self.pos = 0;
            self.filled = n;
        }
    }

    /// Read every remaining line
    pub async fn collect(mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
