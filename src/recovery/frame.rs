//! Frame Reader
//!
//! Turns an arbitrarily chunked byte stream into fixed-width records.
//! The transport gives no framing, so partial frames are carried over
//! between reads.

use super::wire::{decode_record, Record, WireError, RECORD_SIZE};

/// Per-connection frame accumulator
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    frames_yielded: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(RECORD_SIZE * 64),
            frames_yielded: 0,
        }
    }

    /// Append a chunk and iterate every complete frame now buffered.
    ///
    /// Frames are consumed as the iterator advances; anything left when
    /// it is dropped stays buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(chunk);
        Frames {
            reader: self,
            consumed: 0,
        }
    }

    /// Bytes buffered towards the next frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Total frames handed out over this reader's lifetime
    pub fn frames_yielded(&self) -> u64 {
        self.frames_yielded
    }
}

/// Lazy iterator over the frames completed by one [`FrameReader::feed`] call
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
    consumed: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<Record, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.consumed + RECORD_SIZE;
        if end > self.reader.buf.len() {
            return None;
        }
        let frame = &self.reader.buf[self.consumed..end];
        self.consumed = end;
        self.reader.frames_yielded += 1;
        Some(decode_record(frame))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.reader.buf.len() - self.consumed) / RECORD_SIZE;
        (n, Some(n))
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        self.reader.buf.drain(..self.consumed);
    }
}
