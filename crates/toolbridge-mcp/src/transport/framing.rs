//! Newline framing for the Stream transport.
//!
//! Output from a subprocess arrives as arbitrary byte chunks. [`LineBuffer`]
//! accumulates them and hands back only complete lines; a trailing fragment
//! without its `\n` stays buffered until the next chunk completes it.

/// Longest line kept by default. Anything longer is dropped unparsed.
pub const DEFAULT_MAX_LINE: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and splits them into complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
    /// Inside an overlong line; skip until its terminator.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer that drops lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and drain every complete line.
    ///
    /// Returned lines exclude the terminator (and a preceding `\r`). Blank
    /// lines and lines over the length limit are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            self.buf.extend_from_slice(head);
            let line = std::mem::take(&mut self.buf);
            if line.len() > self.max_line {
                tracing::warn!(len = line.len(), max = self.max_line, "dropping overlong output line");
                continue;
            }
            let line = line.strip_suffix(b"\r").map(<[u8]>::to_vec).unwrap_or(line);
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
        }

        if !self.discarding {
            self.buf.extend_from_slice(rest);
            if self.buf.len() > self.max_line {
                tracing::warn!(max = self.max_line, "output line over limit, skipping to its end");
                self.buf = Vec::new();
                self.discarding = true;
            }
        }
        lines
    }

    /// Bytes still waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Whether no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Frame a serialized envelope as one line.
pub fn frame(mut payload: Vec<u8>) -> Vec<u8> {
    payload.push(b'\n');
    payload
}
