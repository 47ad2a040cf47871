use tracing::trace;

/// Marker that makes a line eligible for decoding.
pub const DATA_PREFIX: &str = "data:";

/// Turns arbitrarily cut chunks of a streamed body into parsed `data:` frames.
///
/// Bytes are buffered until a newline arrives, so a frame split across any
/// number of reads decodes the same as the frame read whole. Splitting on the
/// `\n` byte is safe for UTF-8 because it never occurs inside a multi-byte
/// sequence.
///
/// Lines without the `data:` prefix (blank keep-alives, `event:` and `id:`
/// fields, comments) are skipped. Eligible lines whose payload is not valid
/// JSON are dropped without error.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the frames completed by it.
    ///
    /// The returned iterator is lazy. Lines it does not get to are kept and
    /// yielded by the next call.
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> DecodedFrames<'_> {
        self.buffer.extend_from_slice(chunk.as_ref());
        DecodedFrames {
            buffer: &mut self.buffer,
            scanned: &mut self.scanned,
        }
    }

    /// Ends the stream, discarding any unterminated tail.
    ///
    /// Returns the number of bytes dropped. A non-zero value means the
    /// connection closed in the middle of a line.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        dropped
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Iterator over the frames completed by one [`FrameDecoder::push`].
#[derive(Debug)]
pub struct DecodedFrames<'a> {
    buffer: &'a mut Vec<u8>,
    scanned: &'a mut usize,
}

impl Iterator for DecodedFrames<'_> {
    type Item = serde_json::Value;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = *self.scanned;
            let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') else {
                *self.scanned = self.buffer.len();
                return None;
            };
            let end = start + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            *self.scanned = 0;
            if let Some(value) = parse_line(&line[..end]) {
                return Some(value);
            }
        }
    }
}

/// Parses one logical line (without its terminator) as a `data:` frame.
pub fn parse_line(line: &[u8]) -> Option<serde_json::Value> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!(error = %e, len = payload.len(), "Dropping malformed frame");
            None
        }
    }
}
