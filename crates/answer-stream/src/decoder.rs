//! Frame decoder: turns arbitrarily split byte chunks into complete frames.
//!
//! Frames are terminated by `\n\n`. The delimiter is ASCII, so splitting on
//! bytes never cuts through a multi-byte UTF-8 sequence; text decoding happens
//! only once a frame is complete.

const DELIMITER: &[u8] = b"\n\n";

/// One complete, delimiter-bounded unit of the wire stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub text: String,
}

impl Frame {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Incremental `\n\n` frame splitter.
///
/// Keeps the bytes of an incomplete trailing frame across `push_chunk` calls
/// and remembers how far the buffer has already been scanned, so each byte is
/// searched at most once (plus a one-byte overlap for a split delimiter).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completed, in arrival order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(idx) = find_delimiter(&self.buf, self.scanned) {
            frames.push(Frame::from_bytes(&self.buf[consumed..idx]));
            consumed = idx + DELIMITER.len();
            self.scanned = consumed;
        }
        // A trailing '\n' may be the first half of a delimiter.
        self.scanned = self
            .buf
            .len()
            .saturating_sub(DELIMITER.len() - 1)
            .max(consumed);
        if consumed > 0 {
            self.buf.drain(..consumed);
            self.scanned -= consumed;
        }
        frames
    }

    /// Number of bytes held for an incomplete frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Ends the stream, discarding any incomplete trailing frame.
    ///
    /// Returns the number of discarded bytes.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buf.len();
        self.buf.clear();
        self.scanned = 0;
        discarded
    }
}

fn find_delimiter(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
        .map(|pos| pos + from)
}
