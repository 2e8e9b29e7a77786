//! SSE Frame Decoder
//!
//! Incremental decoder for `text/event-stream` bodies. Bytes arrive in
//! arbitrary network-sized chunks; the decoder buffers them and yields one
//! complete event payload at a time, in order.
//!
//! # Frame Format
//!
//! ```text
//! data: <payload>\n
//! \n
//! ```
//!
//! Events are delimited by a blank line (`\n\n`, or `\r\n\r\n` from CRLF
//! providers). An event may span multiple `data:` lines, which are joined
//! with `\n`. Comment lines (leading `:`) and non-`data` fields are
//! keep-alive noise and are skipped.
//!
//! # Chunk Boundaries
//!
//! Never assume one read equals one frame: a delimiter, a `data:` prefix,
//! or even a single multi-byte UTF-8 character can be split across two
//! reads. Buffering happens at the byte level and text decoding only runs
//! on complete events, so split sequences reassemble correctly.
//!
//! The decoder never parses JSON and never fails; payload interpretation
//! belongs to [`crate::protocol::parse_event`].

/// Minimum buffer capacity for the decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Streaming decoder for SSE event payloads.
///
/// Push bytes in with [`push`](Self::push), then drain complete payloads
/// with [`next_payload`](Self::next_payload) until it returns `None`.
#[derive(Debug)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
    /// Position we have consumed up to
    read_pos: usize,
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseFrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append raw bytes from the response body
    pub fn push(&mut self, data: &[u8]) {
        // Compact the buffer once we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Number of unconsumed bytes in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Yield the next complete event payload, if one is buffered.
    ///
    /// Returns `None` when no complete event is available yet; push more
    /// bytes and try again. Events carrying no `data:` lines (comments,
    /// keep-alives) are consumed and skipped.
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let (start, len) = find_delimiter(&self.buffer, self.read_pos)?;
            let block = &self.buffer[self.read_pos..start];
            let payload = extract_data(block);
            self.read_pos = start + len;
            if let Some(payload) = payload {
                return Some(payload);
            }
            // Data-free event; keep scanning.
        }
    }

    /// Drain a trailing unterminated event at end of stream.
    ///
    /// Some providers close the connection without the final blank line;
    /// whatever `data:` lines remain buffered are still a frame.
    pub fn finish(&mut self) -> Option<String> {
        if self.read_pos >= self.buffer.len() {
            return None;
        }
        let payload = extract_data(&self.buffer[self.read_pos..]);
        self.buffer.clear();
        self.read_pos = 0;
        payload
    }
}

/// Find the earliest event delimiter at or after `from`.
///
/// Returns the delimiter's start offset and byte length (`\n\n` = 2,
/// `\r\n\r\n` = 4).
fn find_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' && buf.get(i + 1) == Some(&b'\n') {
            return Some((i, 2));
        }
        if buf[i] == b'\r'
            && buf.get(i + 1) == Some(&b'\n')
            && buf.get(i + 2) == Some(&b'\r')
            && buf.get(i + 3) == Some(&b'\n')
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Join the `data:` lines of one complete event block.
///
/// Returns `None` when the block carries no data lines. The block is only
/// decoded to text here, after the event boundary is known, so split UTF-8
/// sequences have already been reassembled.
fn extract_data(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let mut payload: Option<String> = None;
    for line in text.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            // Comments (":keep-alive") and other fields (event:, id:, retry:)
            continue;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match payload.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => payload = Some(value.to_string()),
        }
    }
    payload
}
