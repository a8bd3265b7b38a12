//! Length-prefixed wire protocol
//!
//! # Frame layout
//!
//! ```text
//! ┌───────────────────────┬─────┬──────────────────────────┐
//! │ Length (ASCII digits) │ '|' │ Payload (JSON, variable) │
//! └───────────────────────┴─────┴──────────────────────────┘
//! ```
//!
//! - **Length**: decimal byte count of the payload only
//! - **Delimiter**: a single `|`; it may also appear inside the payload, the
//!   reader never scans past the first one
//! - **Payload**: one serialized [`Packet`]
//!
//! # Reading
//!
//! [`FrameReader`] owns a byte buffer that survives across calls. Bytes read
//! from the socket but not yet forming a complete frame stay buffered, so a
//! frame split across any number of TCP segments decodes the same as one that
//! arrived whole. Once the first byte of a frame is buffered the rest must
//! arrive within the frame timeout.
//!
//! | Condition | Result |
//! |-----------|--------|
//! | No bytes before the socket read timeout | `Ok(None)` |
//! | Complete frame, valid JSON | `Ok(Some(packet))` |
//! | Complete frame, invalid JSON | `Err(Decode)`; frame consumed, stream still in sync |
//! | Bad digits / no delimiter / too large | `Err(Framing)`; stream must be reset |
//! | Frame incomplete at deadline | `Err(Framing(Timeout))` |
//! | EOF | `Err(Io(UnexpectedEof))` or `Err(Framing(Truncated))` |

use crate::error::{Error, FramingError, Result};
use crate::streaming::packet::Packet;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Separates the length digits from the payload
pub const DELIMITER: u8 = b'|';

/// How far into a new frame the reader looks for the delimiter
pub const MAX_PREFIX_BYTES: usize = 20;

/// Read chunk size for socket reads
const READ_CHUNK: usize = 64 * 1024;

/// Serializes packets into frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Encode a packet as one complete frame
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(packet)?;
        if payload.len() > self.max_payload {
            return Err(FramingError::Oversized {
                len: payload.len(),
                max: self.max_payload,
            }
            .into());
        }

        let prefix = payload.len().to_string();
        let mut frame = Vec::with_capacity(prefix.len() + 1 + payload.len());
        frame.extend_from_slice(prefix.as_bytes());
        frame.push(DELIMITER);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Encode and write a frame; short writes are retried by `write_all`
    pub fn write_frame<W: Write>(&self, writer: &mut W, packet: &Packet) -> Result<usize> {
        let frame = self.encode(packet)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(frame.len())
    }
}

/// Incremental frame decoder over a blocking reader
pub struct FrameReader {
    buffer: Vec<u8>,
    scratch: Box<[u8]>,
    max_payload: usize,
    frame_timeout: Duration,
    /// Set when the first byte of the pending frame arrived
    frame_started: Option<Instant>,
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    prefix_len: usize,
    payload_len: usize,
}

impl Header {
    fn frame_len(&self) -> usize {
        self.prefix_len + self.payload_len
    }
}

impl FrameReader {
    pub fn new(max_payload: usize, frame_timeout: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            max_payload,
            frame_timeout,
            frame_started: None,
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes; used when the underlying stream is replaced
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frame_started = None;
    }

    /// Read the next frame
    ///
    /// The reader's own read timeout bounds the idle wait; the frame timeout
    /// bounds how long a started frame may take to complete.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<Packet>> {
        loop {
            if let Some(header) = self.parse_header()?
                && self.buffer.len() >= header.frame_len()
            {
                return self.take_frame(header).map(Some);
            }

            if let Some(started) = self.frame_started
                && started.elapsed() >= self.frame_timeout
            {
                let expected = self
                    .parse_header()
                    .ok()
                    .flatten()
                    .map(|h| h.frame_len())
                    .unwrap_or(0);
                let available = self.buffer.len();
                return Err(FramingError::Timeout {
                    expected,
                    available,
                }
                .into());
            }

            match reader.read(&mut self.scratch) {
                Ok(0) => {
                    if self.buffer.is_empty() {
                        return Err(Error::Io(std::io::Error::new(
                            ErrorKind::UnexpectedEof,
                            "peer closed the stream",
                        )));
                    }
                    return Err(FramingError::Truncated {
                        available: self.buffer.len(),
                    }
                    .into());
                }
                Ok(n) => {
                    if self.buffer.is_empty() {
                        self.frame_started = Some(Instant::now());
                    }
                    self.buffer.extend_from_slice(&self.scratch[..n]);
                    log::trace!("Read {} bytes ({} buffered)", n, self.buffer.len());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Inspect the buffered prefix without consuming anything
    fn parse_header(&self) -> std::result::Result<Option<Header>, FramingError> {
        let window = &self.buffer[..self.buffer.len().min(MAX_PREFIX_BYTES)];

        let Some(pos) = window.iter().position(|&b| b == DELIMITER) else {
            if !window.iter().all(u8::is_ascii_digit) {
                return Err(FramingError::InvalidLength(
                    String::from_utf8_lossy(window).into_owned(),
                ));
            }
            if self.buffer.len() >= MAX_PREFIX_BYTES {
                return Err(FramingError::MissingDelimiter {
                    scanned: MAX_PREFIX_BYTES,
                });
            }
            return Ok(None);
        };

        let digits = &window[..pos];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(FramingError::InvalidLength(
                String::from_utf8_lossy(digits).into_owned(),
            ));
        }
        let text = String::from_utf8_lossy(digits);
        let payload_len: usize = text
            .parse()
            .map_err(|_| FramingError::InvalidLength(text.to_string()))?;
        if payload_len > self.max_payload {
            return Err(FramingError::Oversized {
                len: payload_len,
                max: self.max_payload,
            });
        }

        Ok(Some(Header {
            prefix_len: pos + 1,
            payload_len,
        }))
    }

    /// Consume exactly one frame and decode its payload
    fn take_frame(&mut self, header: Header) -> Result<Packet> {
        let frame: Vec<u8> = self.buffer.drain(..header.frame_len()).collect();
        self.frame_started = if self.buffer.is_empty() {
            None
        } else {
            Some(Instant::now())
        };
        let packet = serde_json::from_slice(&frame[header.prefix_len..])?;
        Ok(packet)
    }
}
