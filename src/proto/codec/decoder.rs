use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Streaming RESP decoder.
///
/// Bytes are appended as they arrive; [`decode`](Decoder::decode) only
/// consumes input once a whole frame is available, so a partial frame is
/// left untouched until the rest of it shows up.
///
/// ```
/// use slotmux::proto::codec::Decoder;
/// use slotmux::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r");
/// assert!(decoder.decode().unwrap().is_none());
/// decoder.append(b"\n");
/// assert_eq!(decoder.decode().unwrap(), Some(Frame::Simple("OK".into())));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a decoder with the default 512 MiB frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a decoder that rejects frames larger than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Appends raw bytes received from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Gives socket readers direct access to the receive buffer.
    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decodes the next complete frame, or returns `Ok(None)` if more input
    /// is needed.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        match parse(&self.buf, 0, self.max_frame_size)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None if self.buf.len() > self.max_frame_size => Err(DecodeError::FrameTooLarge {
                size: self.buf.len(),
                limit: self.max_frame_size,
            }),
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one frame starting at `pos`; returns the frame and the position
/// right after it.
fn parse(buf: &[u8], pos: usize, limit: usize) -> Result<Option<(Frame, usize)>, DecodeError> {
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(Some((Frame::Simple(utf8(line)?), next))),
        b'-' => Ok(Some((Frame::Error(utf8(line)?), next))),
        b':' => Ok(Some((Frame::Integer(integer(line)?), next))),
        b'$' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((Frame::Bulk(None), next)));
            }
            let len = length(len, limit)?;
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(DecodeError::MissingTerminator);
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Frame::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            let len = length(len, limit)?;
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse(buf, cursor, limit)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Frame::Array(items), cursor)))
        }
        other => Err(DecodeError::UnknownType(other)),
    }
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    rest.windows(2)
        .position(|w| w == b"\r\n")
        .map(|idx| (&rest[..idx], start + idx + 2))
}

fn utf8(line: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8)
}

fn integer(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(DecodeError::InvalidInteger)
}

fn length(len: i64, limit: usize) -> Result<usize, DecodeError> {
    let len = usize::try_from(len).map_err(|_| DecodeError::InvalidLength(len))?;
    if len > limit {
        return Err(DecodeError::FrameTooLarge { size: len, limit });
    }
    Ok(len)
}
