use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

/// Appends the RESP encoding of `frame` to `dst`.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => put_line(dst, b'+', s.as_bytes()),
        Frame::Error(e) => put_line(dst, b'-', e.as_bytes()),
        Frame::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
        Frame::Bulk(Some(data)) => {
            put_line(dst, b'$', data.len().to_string().as_bytes());
            dst.extend_from_slice(data);
            dst.extend_from_slice(b"\r\n");
        }
        Frame::Bulk(None) => dst.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            put_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                encode(item, dst);
            }
        }
        Frame::Null => dst.extend_from_slice(b"*-1\r\n"),
    }
}

fn put_line(dst: &mut BytesMut, marker: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.put_u8(marker);
    dst.extend_from_slice(body);
    dst.extend_from_slice(b"\r\n");
}

/// A reusable RESP encoder backed by one growable buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a frame into the internal buffer.
    pub fn encode(&mut self, frame: &Frame) {
        encode(frame, &mut self.buf);
    }

    /// Takes the encoded bytes, leaving the encoder empty and reusable.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}
