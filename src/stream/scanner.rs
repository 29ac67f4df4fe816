//! Chunk Buffer Scanner
//!
//! Splits raw transport bytes into complete SSE records on the `\n\n`
//! boundary. Works on bytes throughout; nothing is converted to text here.

use bytes::{Bytes, BytesMut};
use memchr::memmem;
use std::sync::LazyLock;

/// Record delimiter
const DELIMITER: &[u8] = b"\n\n";

/// Terminal sentinel line
const DONE_SENTINEL: &[u8] = b"data: [DONE]";

static DONE_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(DONE_SENTINEL));

/// One complete SSE record, delimiter included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord(Bytes);

impl SseRecord {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Whether this record carries the `data: [DONE]` sentinel.
    ///
    /// The literal only counts when it fills a whole line, so a JSON
    /// payload quoting it does not end the stream.
    pub fn is_done_sentinel(&self) -> bool {
        let bytes = self.as_bytes();
        DONE_FINDER.find_iter(bytes).any(|pos| {
            let line_start = pos == 0 || bytes[pos - 1] == b'\n';
            let rest = &bytes[pos + DONE_SENTINEL.len()..];
            let line_end = matches!(rest.first(), None | Some(b'\n') | Some(b'\r'));
            line_start && line_end
        })
    }

    fn is_blank(bytes: &[u8]) -> bool {
        bytes.iter().all(u8::is_ascii_whitespace)
    }
}

/// Accumulates bytes and emits complete records.
///
/// The buffer holds at most one partial record between calls. Bytes already
/// searched for a delimiter are not searched again.
#[derive(Debug, Default)]
pub struct ChunkScanner {
    buffer: BytesMut,

    /// Prefix of `buffer` known to contain no delimiter
    scanned: usize,
}

impl ChunkScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every record they complete, in order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(bytes);

        let mut records = Vec::new();
        loop {
            // Step back one byte: the delimiter may straddle the old boundary
            let from = self.scanned.saturating_sub(1);
            match memmem::find(&self.buffer[from..], DELIMITER) {
                Some(offset) => {
                    let end = from + offset + DELIMITER.len();
                    let record = self.buffer.split_to(end).freeze();
                    self.scanned = 0;
                    if !SseRecord::is_blank(&record) {
                        records.push(SseRecord(record));
                    }
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        records
    }

    /// Flush a trailing partial record at end of stream, terminated with a
    /// synthesized delimiter
    pub fn finish(&mut self) -> Option<SseRecord> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }

        let mut rest = self.buffer.split();
        if SseRecord::is_blank(&rest) {
            return None;
        }

        rest.extend_from_slice(DELIMITER);
        Some(SseRecord(rest.freeze()))
    }

    /// Bytes held back waiting for a delimiter
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
