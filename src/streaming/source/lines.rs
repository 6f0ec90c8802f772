// Pull-based line reader over a buffered byte stream
//
// Each pull yields one line, a recoverable protocol error (invalid UTF-8 or an
// over-long line), a fatal transport error, or end of stream. Partial lines
// stay in `pending` between pulls, so dropping an in-flight `next_line` future
// loses nothing.

use crate::streaming::types::{StreamError, StreamResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

pub struct LineStream {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    pending: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
    finished: bool,
}

impl LineStream {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            pending: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            discarding: false,
            finished: false,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.set_max_line_bytes(max_line_bytes);
        self
    }

    pub fn set_max_line_bytes(&mut self, max_line_bytes: usize) {
        self.max_line_bytes = max_line_bytes.max(1);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull the next line without its terminator (`\n` or `\r\n`).
    ///
    /// `Ok(None)` means the remote side closed the stream.
    pub async fn next_line(&mut self) -> StreamResult<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let available = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Err(StreamError::Connection(format!("read failed: {}", e)));
                }
            };

            if available.is_empty() {
                self.finished = true;
                if self.discarding {
                    self.discarding = false;
                    return Err(self.overlong());
                }
                if self.pending.is_empty() {
                    return Ok(None);
                }
                // Unterminated tail; let the decoder judge it
                return self.take_line().map(Some);
            }

            let (chunk_len, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i, true),
                None => (available.len(), false),
            };

            if !self.discarding {
                if self.pending.len() + chunk_len > self.max_line_bytes {
                    self.discarding = true;
                    self.pending.clear();
                } else {
                    self.pending.extend_from_slice(&available[..chunk_len]);
                }
            }

            let consumed = if complete { chunk_len + 1 } else { chunk_len };
            self.reader.consume(consumed);

            if complete {
                if self.discarding {
                    self.discarding = false;
                    return Err(self.overlong());
                }
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> StreamResult<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map_err(|e| StreamError::Protocol(format!("line is not valid UTF-8: {}", e)))
    }

    fn overlong(&self) -> StreamError {
        StreamError::Protocol(format!(
            "line exceeds {} bytes and was discarded",
            self.max_line_bytes
        ))
    }
}
