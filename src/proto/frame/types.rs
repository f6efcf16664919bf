use bytes::Bytes;

/// A RESP reply or request frame.
///
/// This is the raw reply shape every command normalizer starts from:
/// - SimpleString: status replies like "OK"
/// - Error: error replies, first token is the error kind
/// - Integer: counts
/// - BulkString: binary-safe values
/// - Array: command arguments and multi-value replies
/// - Null: absent value (`$-1` or `*-1` on the wire)
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar). An empty payload is still a value.
    BulkString(Bytes),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Returns true if this frame is a simple string equal to `OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::SimpleString(s) if s.as_slice() == b"OK")
    }

    /// Returns true if this frame is Null.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns the error payload if this is an error frame.
    pub fn as_error(&self) -> Option<&[u8]> {
        match self {
            Frame::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Short name of the frame kind, used in protocol error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::SimpleString(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::BulkString(_) => "bulk string",
            Frame::Array(_) => "array",
            Frame::Null => "null",
        }
    }

    /// Returns the bulk payload as UTF-8 text, if this is a bulk or simple string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::BulkString(b) => std::str::from_utf8(b).ok(),
            Frame::SimpleString(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }
}
