//! Reply normalization.
//!
//! Each function maps the raw [`Frame`] a command returned to the typed
//! value the public API promises. An error frame always becomes an
//! [`Error::Server`]; it is never coerced into a zero value.

use std::fmt;

use bytes::Bytes;

use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Outcome of a SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStatus {
    /// The value was stored.
    Ok,
    /// A conditional set did not apply. The stored value is unchanged.
    NotSet,
    /// `return_old_value` was requested: the previous value, `None` if the
    /// key did not exist.
    OldValue(Option<String>),
}

impl SetStatus {
    /// The status as the store's zero-value string convention:
    /// `"OK"`, `""` when not set, or the old value (empty if there was none).
    pub fn as_str(&self) -> &str {
        match self {
            SetStatus::Ok => "OK",
            SetStatus::NotSet => "",
            SetStatus::OldValue(old) => old.as_deref().unwrap_or(""),
        }
    }
}

impl fmt::Display for SetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passes an error frame through as a server error.
#[inline]
pub fn check_error(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(Error::from_server_reply(&e)),
        _ => Ok(frame),
    }
}

fn unexpected(command: &str, frame: &Frame) -> Error {
    Error::Protocol {
        message: format!("unexpected {} reply for {command}", frame.kind()),
    }
}

fn decode_text(command: &str, data: Bytes) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|_| Error::Protocol {
        message: format!("{command} value is not valid UTF-8"),
    })
}

/// Normalizes a GET reply. `None` means the key does not exist; an
/// existing empty value is `Some("")`.
pub fn get(frame: Frame) -> Result<Option<String>> {
    match check_error(frame)? {
        Frame::Null => Ok(None),
        Frame::BulkString(data) => decode_text("GET", data).map(Some),
        other => Err(unexpected("GET", &other)),
    }
}

/// Normalizes a SET reply. `return_old_value` must match the `GET` flag
/// the request was encoded with, since `Null` means different things
/// with and without it.
pub fn set(frame: Frame, return_old_value: bool) -> Result<SetStatus> {
    match (check_error(frame)?, return_old_value) {
        (frame, false) if frame.is_ok() => Ok(SetStatus::Ok),
        (Frame::Null, false) => Ok(SetStatus::NotSet),
        (Frame::Null, true) => Ok(SetStatus::OldValue(None)),
        (Frame::BulkString(data), true) => {
            decode_text("SET", data).map(|old| SetStatus::OldValue(Some(old)))
        }
        (other, _) => Err(unexpected("SET", &other)),
    }
}

/// Normalizes an MSET reply, which is always `OK` on success.
pub fn mset(frame: Frame) -> Result<()> {
    match check_error(frame)? {
        frame if frame.is_ok() => Ok(()),
        other => Err(unexpected("MSET", &other)),
    }
}

/// Normalizes an MGET reply for `expected` keys, each element as GET.
pub fn mget(frame: Frame, expected: usize) -> Result<Vec<Option<String>>> {
    match check_error(frame)? {
        Frame::Array(items) => {
            if items.len() != expected {
                return Err(Error::Protocol {
                    message: format!(
                        "MGET returned {} values for {expected} keys",
                        items.len()
                    ),
                });
            }
            items.into_iter().map(get).collect()
        }
        other => Err(unexpected("MGET", &other)),
    }
}

/// Normalizes an integer reply (DEL, EXISTS).
pub fn integer(command: &str, frame: Frame) -> Result<i64> {
    match check_error(frame)? {
        Frame::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}
