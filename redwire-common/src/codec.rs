//! # RESP2 Encoding and Incremental Parsing
//!
//! Purpose: Encode requests and decode replies over caller-owned buffers,
//! resuming cleanly whenever the receive buffer runs dry mid-frame.
//!
//! ## Design Principles
//! 1. **Suspend, Never Block**: `ReplyDecoder::decode` returns `Ok(None)`
//!    when more bytes are needed and always knows how many (`Needed`).
//! 2. **Resumable State**: Partially decoded arrays and a pending bulk length
//!    live in the decoder, so bytes are consumed exactly once.
//! 3. **Binary-Safe**: Bulk strings are split out of the buffer as `Bytes`.
//! 4. **Fail Fast**: Invalid framing returns `FramingError` immediately.
//!
//! ## Wire Layout
//!
//! ```text
//! request:  *<N>\r\n  ( $<L>\r\n <L bytes> \r\n ) x N
//! replies:  +<text>\r\n | -<text>\r\n | :<int>\r\n
//!           $<L>\r\n <L bytes> \r\n | $-1\r\n
//!           *<N>\r\n <N replies>     | *-1\r\n
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FramingError, ServerError};
use crate::reply::Reply;
use crate::request::Request;

const CRLF: &[u8; 2] = b"\r\n";

/// Upper bound on the capacity reserved up front for one array.
///
/// Counts come from the peer; larger arrays still decode, they just grow.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// Largest bulk payload accepted from the peer (the server's own limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array element count accepted from the peer.
pub const MAX_ARRAY_LEN: usize = 512 * 1024 * 1024;

/// Encodes one request as a RESP2 array of bulk strings.
pub fn encode_request(request: &Request, out: &mut BytesMut) {
    let args = request.as_args();
    out.reserve(16 + args.iter().map(|arg| arg.len() + 16).sum::<usize>());
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(CRLF);
    for arg in args {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(CRLF);
        out.put_slice(arg);
        out.put_slice(CRLF);
    }
}

/// What the decoder is waiting for when it suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needed {
    /// Bytes up to and including the next CRLF.
    Line,
    /// Exactly this many more bytes (bulk payload plus its CRLF).
    Bytes(usize),
}

/// Array whose elements are still arriving.
#[derive(Debug)]
struct PartialArray {
    expected: usize,
    items: Vec<Reply>,
}

/// Incremental RESP2 reply decoder.
///
/// Feed it the connection's receive buffer after every read. Consumed bytes
/// are removed from the buffer; unconsumed bytes belong to the next frame.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    stack: Vec<PartialArray>,
    pending_bulk: Option<usize>,
    // Bytes already searched for CRLF without success.
    scanned: usize,
}

impl ReplyDecoder {
    /// Creates an idle decoder.
    pub fn new() -> Self {
        ReplyDecoder::default()
    }

    /// True when no reply is partially decoded.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.pending_bulk.is_none()
    }

    /// Drops any partially decoded state.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.pending_bulk = None;
        self.scanned = 0;
    }

    /// Reports what must arrive before `decode` can make progress on `buf`.
    pub fn needed(&self, buf: &[u8]) -> Needed {
        match self.pending_bulk {
            Some(len) => Needed::Bytes((len + 2).saturating_sub(buf.len())),
            None => Needed::Line,
        }
    }

    /// Decodes one complete reply from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` ends mid-frame; call again after more
    /// bytes were appended. Errors leave the decoder in an unusable state
    /// and the stream must be abandoned.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>, FramingError> {
        loop {
            let value = match self.pending_bulk {
                Some(len) => match self.take_bulk(buf, len)? {
                    Some(value) => value,
                    None => return Ok(None),
                },
                None => match self.take_line(buf)? {
                    Some(Step::Value(value)) => value,
                    Some(Step::Continue) => continue,
                    None => return Ok(None),
                },
            };

            if let Some(reply) = self.complete(value) {
                return Ok(Some(reply));
            }
        }
    }

    fn take_bulk(&mut self, buf: &mut BytesMut, len: usize) -> Result<Option<Reply>, FramingError> {
        if buf.len() < len + 2 {
            return Ok(None);
        }
        if &buf[len..len + 2] != CRLF {
            return Err(FramingError::MissingCrlf);
        }
        let data = buf.split_to(len).freeze();
        buf.advance(2);
        self.pending_bulk = None;
        Ok(Some(Reply::Bulk(Some(data))))
    }

    fn take_line(&mut self, buf: &mut BytesMut) -> Result<Option<Step>, FramingError> {
        let pos = match find_crlf(buf, self.scanned) {
            Some(pos) => pos,
            None => {
                // Keep the trailing '\r' unscanned; its '\n' may be next.
                self.scanned = buf.len().saturating_sub(1);
                return Ok(None);
            }
        };
        self.scanned = 0;

        let line = buf.split_to(pos);
        buf.advance(2);
        if line.is_empty() {
            return Err(FramingError::EmptyLine);
        }

        let body = &line[1..];
        let step = match line[0] {
            b'+' => Step::Value(Reply::Status(String::from_utf8_lossy(body).into_owned())),
            b'-' => Step::Value(Reply::Error(ServerError::new(String::from_utf8_lossy(body)))),
            b':' => Step::Value(Reply::Integer(parse_i64(body)?)),
            b'$' => match parse_i64(body)? {
                -1 => Step::Value(Reply::Bulk(None)),
                len if !(0..=MAX_BULK_LEN as i64).contains(&len) => {
                    return Err(FramingError::InvalidLength(len))
                }
                len => {
                    self.pending_bulk = Some(len as usize);
                    Step::Continue
                }
            },
            b'*' => match parse_i64(body)? {
                -1 => Step::Value(Reply::NullArray),
                0 => Step::Value(Reply::Array(Vec::new())),
                count if !(0..=MAX_ARRAY_LEN as i64).contains(&count) => {
                    return Err(FramingError::InvalidLength(count))
                }
                count => {
                    let expected = count as usize;
                    self.stack.push(PartialArray {
                        expected,
                        items: Vec::with_capacity(expected.min(MAX_PREALLOC_ITEMS)),
                    });
                    Step::Continue
                }
            },
            tag => return Err(FramingError::UnknownTag(tag)),
        };
        Ok(Some(step))
    }

    /// Folds a finished value into the enclosing arrays, returning the
    /// top-level reply once the outermost array is full.
    fn complete(&mut self, mut value: Reply) -> Option<Reply> {
        loop {
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => return Some(value),
            };
            frame.items.push(value);
            if frame.items.len() < frame.expected {
                return None;
            }
            let items = self.stack.pop().map(|frame| frame.items).unwrap_or_default();
            value = Reply::Array(items);
        }
    }
}

enum Step {
    Value(Reply),
    Continue,
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    (from..buf.len() - 1).find(|&idx| buf[idx] == b'\r' && buf[idx + 1] == b'\n')
}

fn parse_i64(data: &[u8]) -> Result<i64, FramingError> {
    let invalid = || FramingError::InvalidInteger(String::from_utf8_lossy(data).into_owned());
    if data.is_empty() {
        return Err(invalid());
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| {
                let digit = (b - b'0') as i64;
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or_else(invalid)?;
    }
    Ok(value)
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}
