use bytes::Bytes;

/// A RESP2 frame.
///
/// Simple strings and errors are line-oriented and always text, so they are
/// kept as `String`. Bulk payloads are binary-safe.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    Simple(String),
    /// Error (-ERR ...).
    Error(String),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar); `None` for the null bulk string.
    Bulk(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null array (*-1).
    Null,
}

impl Frame {
    /// Builds a bulk frame from anything convertible to [`Bytes`].
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// Returns the message if this is an error reply.
    pub fn as_error(&self) -> Option<&str> {
        match self {
            Frame::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Returns true for `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }

    /// Returns true for both null encodings.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::Bulk(None))
    }

    /// Reads a textual payload from a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::Simple(s) => Some(s.clone()),
            Frame::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_accessor() {
        let frame = Frame::Error("MOVED 1 localhost:7000".to_string());
        assert_eq!(frame.as_error(), Some("MOVED 1 localhost:7000"));
        assert_eq!(Frame::Integer(1).as_error(), None);
    }

    #[test]
    fn test_null_forms() {
        assert!(Frame::Null.is_null());
        assert!(Frame::Bulk(None).is_null());
        assert!(!Frame::bulk("x").is_null());
    }

    #[test]
    fn test_as_text() {
        assert_eq!(Frame::Simple("PONG".into()).as_text().as_deref(), Some("PONG"));
        assert_eq!(Frame::bulk("host").as_text().as_deref(), Some("host"));
        assert_eq!(Frame::Integer(3).as_text(), None);
        assert!(Frame::Simple("OK".into()).is_ok());
    }
}
