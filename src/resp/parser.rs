//! Streaming reply decoder.
//!
//! [`Decoder::feed`] accepts raw bytes in whatever chunks the transport
//! delivers them and emits every reply that completed. Partial input is
//! held across calls: unconsumed bytes stay in the accumulator, and a
//! half-read array keeps its already-decoded elements on an explicit
//! continuation stack so nothing is parsed twice. The output is identical
//! regardless of how the byte stream is chunked.
//!
//! Bulk payloads are extracted by zero-copy `Bytes` slicing.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

use crate::error::{KvPipeError, Result};
use crate::resp::types::Reply;

/// Initial accumulator capacity (16 KB).
const INITIAL_BUF_CAPACITY: usize = 16 * 1024;

/// Default maximum accumulator size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// A partially-decoded array: the declared element count and the elements
/// decoded so far.
struct ArrayFrame {
    expected: usize,
    items: Vec<Reply>,
}

/// One step of the incremental parse.
enum Step {
    /// A complete value was read off the front of the buffer.
    Value(Reply),
    /// An array header with a positive count was read; elements follow.
    Open(usize),
}

/// Incremental reply parser with an owned byte accumulator.
pub struct Decoder {
    buf: BytesMut,
    stack: Vec<ArrayFrame>,
    max_buf_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder with the default buffer cap.
    pub fn new() -> Self {
        Self::with_max_buf(DEFAULT_MAX_BUF_SIZE)
    }

    /// Create a decoder with a configurable buffer cap.
    pub fn with_max_buf(max_buf_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUF_CAPACITY),
            stack: Vec::new(),
            max_buf_size,
        }
    }

    /// Drop all buffered bytes and any partial parse state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stack.clear();
    }

    /// True when nothing is buffered and no reply is in progress.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.stack.is_empty()
    }

    /// Consume one inbound chunk, returning every reply that completed.
    ///
    /// May return zero, one, or many replies. Insufficient data is not an
    /// error: the bytes are retained and parsing resumes on the next call.
    /// A malformed frame (unknown marker, bad integer, missing terminator
    /// where data is present) is fatal and poisons the stream.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Reply>> {
        if self.buf.len() + data.len() > self.max_buf_size {
            return Err(KvPipeError::Protocol(format!(
                "reply too large: buffer would exceed {} bytes",
                self.max_buf_size
            )));
        }
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        loop {
            match self.parse_step() {
                Ok(Some(Step::Value(value))) => {
                    if let Some(complete) = self.absorb(value) {
                        out.push(complete);
                    }
                }
                Ok(Some(Step::Open(count))) => {
                    self.stack.push(ArrayFrame {
                        expected: count,
                        items: Vec::with_capacity(count),
                    });
                }
                Ok(None) => break, // suspend: wait for more bytes
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Feed a decoded value into the innermost pending array, collapsing
    /// finished arrays outward. Returns the value once no array is pending.
    fn absorb(&mut self, mut value: Reply) -> Option<Reply> {
        while let Some(frame) = self.stack.last_mut() {
            frame.items.push(value);
            if frame.items.len() < frame.expected {
                return None;
            }
            let frame = self.stack.pop().expect("stack head checked above");
            value = Reply::Array(frame.items);
        }
        Some(value)
    }

    /// Try to parse one node off the front of the buffer.
    ///
    /// `Ok(None)` means suspend: not enough bytes, and none were consumed.
    fn parse_step(&mut self) -> Result<Option<Step>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        match self.buf[0] {
            b'+' => {
                let (text, end) = match self.take_line()? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                self.buf.advance(end);
                Ok(Some(Step::Value(Reply::Status(text))))
            }
            b'-' => {
                let (text, end) = match self.take_line()? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                self.buf.advance(end);
                Ok(Some(Step::Value(Reply::Error(text))))
            }
            b':' => {
                let (n, end) = match self.take_int_line()? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                self.buf.advance(end);
                Ok(Some(Step::Value(Reply::Integer(n))))
            }
            b'$' => self.parse_bulk(),
            b'*' => {
                let (count, end) = match self.take_int_line()? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                self.buf.advance(end);
                if count < 0 {
                    Ok(Some(Step::Value(Reply::Null)))
                } else if count == 0 {
                    Ok(Some(Step::Value(Reply::Array(Vec::new()))))
                } else {
                    Ok(Some(Step::Open(count as usize)))
                }
            }
            other => Err(KvPipeError::Protocol(format!(
                "unknown reply marker: 0x{other:02x}"
            ))),
        }
    }

    /// `$<len>\r\n<data>\r\n` or `$-1\r\n`. The header and payload are
    /// consumed together, only once both are fully buffered.
    fn parse_bulk(&mut self) -> Result<Option<Step>> {
        let (len, header_end) = match self.take_int_line()? {
            Some(v) => v,
            None => return Ok(None),
        };

        if len < 0 {
            self.buf.advance(header_end);
            return Ok(Some(Step::Value(Reply::Null)));
        }

        let len = len as usize;
        let total = header_end + len + 2;
        if self.buf.len() < total {
            return Ok(None);
        }
        if self.buf[header_end + len] != b'\r' || self.buf[header_end + len + 1] != b'\n' {
            return Err(KvPipeError::Protocol(
                "bulk payload not terminated by \\r\\n".into(),
            ));
        }

        // Zero-copy: slice the ref-counted frame instead of copying payload
        let frame: Bytes = self.buf.split_to(total).freeze();
        let data = frame.slice(header_end..header_end + len);
        Ok(Some(Step::Value(Reply::Bulk(data))))
    }

    /// Read the line after the marker byte. Returns `(text, end)` where
    /// `end` is the offset just past the `\r\n`, without consuming.
    fn take_line(&self) -> Result<Option<(String, usize)>> {
        match read_line(&self.buf, 1) {
            Ok((line, end)) => {
                let text = std::str::from_utf8(line)
                    .map_err(|e| {
                        KvPipeError::Protocol(format!("invalid UTF-8 in line reply: {e}"))
                    })?
                    .to_string();
                Ok(Some((text, end)))
            }
            Err(KvPipeError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read the integer line after the marker byte, without consuming.
    fn take_int_line(&self) -> Result<Option<(i64, usize)>> {
        match read_line(&self.buf, 1) {
            Ok((line, end)) => Ok(Some((parse_int(line)?, end))),
            Err(KvPipeError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Find the next `\r\n` in `buf` starting at `offset`.
/// Returns the index of `\r`.
#[inline]
fn find_crlf(buf: &[u8], offset: usize) -> Result<usize> {
    let search = &buf[offset..];
    match memchr(b'\r', search) {
        Some(pos) => {
            let abs = offset + pos;
            if abs + 1 < buf.len() && buf[abs + 1] == b'\n' {
                Ok(abs)
            } else if abs + 1 >= buf.len() {
                Err(KvPipeError::Incomplete)
            } else {
                Err(KvPipeError::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(KvPipeError::Incomplete),
    }
}

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let cr = find_crlf(buf, offset)?;
    Ok((&buf[offset..cr], cr + 2))
}

/// Parse a signed integer from a byte slice (no allocations).
fn parse_int(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(KvPipeError::Protocol("empty integer".into()));
    }
    let (negative, digits) = if bytes[0] == b'-' {
        (true, &bytes[1..])
    } else if bytes[0] == b'+' {
        (false, &bytes[1..])
    } else {
        (false, bytes)
    };

    if digits.is_empty() {
        return Err(KvPipeError::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative to handle i64::MIN correctly:
    // |i64::MIN| overflows positive i64, but -|digit| never overflows negative i64.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(KvPipeError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| KvPipeError::Protocol("integer overflow".into()))?;
    }

    // n is always <= 0 here. Negate for positive numbers.
    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| KvPipeError::Protocol("integer overflow".into()))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
