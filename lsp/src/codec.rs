//! `Content-Length` framing.
//!
//! Stream transports carry `Content-Length: N\r\n\r\n{payload}` frames. The
//! [`FrameDecoder`] is push-based: bytes arrive in whatever pieces the
//! transport hands over, and complete frames are pulled out once enough bytes
//! are buffered. [`FrameReader`] and [`FrameWriter`] wrap it for async IO.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const CRLF: &[u8] = b"\r\n";

const CONTENT_LENGTH: &str = "Content-Length";

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// One wire envelope. The length is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),
    #[error("Content-Length {length} exceeds maximum {MAX_FRAME_BYTES}")]
    FrameTooLarge { length: usize },
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Longest header block accepted before the input is treated as garbage.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Where the decoder is within the byte stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Phase {
    #[default]
    Header,
    /// Body length announced by an already-consumed header.
    Body(usize),
    /// Body bytes of a rejected oversized frame still to drop.
    Skip(usize),
    /// Header block over [`MAX_HEADER_BYTES`]; drop through its terminator.
    SkipHeader,
    /// Drop input until the next `Content-Length` field.
    Resync,
}

/// Incremental header/body splitter.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    phase: Phase,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as part of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete frame out of the buffer.
    ///
    /// `Ok(None)` means more input is needed. After a header error the
    /// decoder drops input up to the next `Content-Length` field, so the body
    /// of the rejected frame never leaks into the following header. The body
    /// of an oversized frame is skipped by its announced length.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.phase {
                Phase::Body(length) => {
                    if self.buf.len() < length {
                        return Ok(None);
                    }
                    let payload: Vec<u8> = self.buf.drain(..length).collect();
                    self.phase = Phase::Header;
                    return Ok(Some(Frame::new(payload)));
                }
                Phase::Skip(remaining) => {
                    let dropped = remaining.min(self.buf.len());
                    self.buf.drain(..dropped);
                    if dropped < remaining {
                        self.phase = Phase::Skip(remaining - dropped);
                        return Ok(None);
                    }
                    self.phase = Phase::Header;
                }
                Phase::SkipHeader => {
                    if let Some(end) = find(&self.buf, HEADER_TERMINATOR) {
                        self.buf.drain(..end + HEADER_TERMINATOR.len());
                        self.phase = Phase::Resync;
                    } else {
                        self.drain_keeping_suffix(HEADER_TERMINATOR.len() - 1);
                        return Ok(None);
                    }
                }
                Phase::Resync => {
                    if let Some(start) = find(&self.buf, CONTENT_LENGTH.as_bytes()) {
                        self.buf.drain(..start);
                        self.phase = Phase::Header;
                    } else {
                        self.drain_keeping_suffix(CONTENT_LENGTH.len() - 1);
                        return Ok(None);
                    }
                }
                Phase::Header => return self.next_header(),
            }
        }
    }

    /// Parse one header block and continue into the phase that follows it.
    fn next_header(&mut self) -> Result<Option<Frame>, FrameError> {
        // Blank lines between frames are not a header terminator.
        let blank = leading_blank_lines(&self.buf);
        if blank > 0 {
            self.buf.drain(..blank);
        }

        let end = match find(&self.buf, HEADER_TERMINATOR) {
            Some(end) if end <= MAX_HEADER_BYTES => end,
            Some(end) => {
                self.buf.drain(..end + HEADER_TERMINATOR.len());
                self.phase = Phase::Resync;
                return Err(header_too_long());
            }
            None if self.buf.len() > MAX_HEADER_BYTES => {
                self.drain_keeping_suffix(HEADER_TERMINATOR.len() - 1);
                self.phase = Phase::SkipHeader;
                return Err(header_too_long());
            }
            None => return Ok(None),
        };

        let header: Vec<u8> = self.buf.drain(..end + HEADER_TERMINATOR.len()).collect();
        match parse_content_length(&header[..end]) {
            Ok(length) if length > MAX_FRAME_BYTES => {
                self.phase = Phase::Skip(length);
                Err(FrameError::FrameTooLarge { length })
            }
            Ok(length) => {
                self.phase = Phase::Body(length);
                self.next_frame()
            }
            Err(err) => {
                self.phase = Phase::Resync;
                Err(err)
            }
        }
    }

    /// Drop buffered bytes except a tail that may begin a split marker.
    fn drain_keeping_suffix(&mut self, keep: usize) {
        let excess = self.buf.len().saturating_sub(keep);
        self.buf.drain(..excess);
    }
}

fn header_too_long() -> FrameError {
    FrameError::MalformedHeader(format!("header exceeds {MAX_HEADER_BYTES} bytes"))
}

fn leading_blank_lines(buf: &[u8]) -> usize {
    let mut skipped = 0;
    while buf[skipped..].starts_with(CRLF) {
        skipped += CRLF.len();
    }
    skipped
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, FrameError> {
    let header = String::from_utf8_lossy(header);
    let mut content_length = None;

    for line in header.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // Field names are matched exactly; other fields are ignored.
        if key.trim() == CONTENT_LENGTH {
            let value = value.trim();
            let length = value.parse::<usize>().map_err(|_| {
                FrameError::MalformedHeader(format!("invalid {CONTENT_LENGTH} value {value:?}"))
            })?;
            content_length = Some(length);
        }
    }

    content_length
        .ok_or_else(|| FrameError::MalformedHeader(format!("missing {CONTENT_LENGTH} header")))
}

/// Serialize a payload into a complete header-framed byte sequence.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Reads frames from an async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF. A header error is returned once and the
    /// reader stays usable for the frames after it.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                if self.decoder.buffered() > 0 {
                    tracing::debug!(
                        "EOF with {} unframed bytes buffered",
                        self.decoder.buffered()
                    );
                }
                return Ok(None);
            }
            self.decoder.push(&chunk[..read]);
        }
    }
}

/// Writes frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one payload with its `Content-Length` header, then flush.
    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.writer.write_all(&encode_frame(payload)).await?;
        self.writer.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
