//! Frame decoder for the event stream.
//!
//! The transport delivers arbitrary byte chunks; frames are delimited by a
//! blank line (`\n\n`). Chunk boundaries may fall anywhere, including inside
//! a multi-byte character, so bytes are buffered until a full frame is
//! available and only then decoded to text.

use bytes::{Buf, BytesMut};

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Incremental splitter turning byte chunks into whole frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk read from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if the buffer holds one.
    ///
    /// The delimiter is consumed and empty frames are discarded. Returns
    /// `None` when the buffer holds no complete frame yet; trailing partial
    /// data stays buffered for the next `push`.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let pos = find_delimiter(&self.buf)?;
            let frame = self.buf.split_to(pos);
            self.buf.advance(FRAME_DELIMITER.len());

            let text = String::from_utf8_lossy(&frame);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}
