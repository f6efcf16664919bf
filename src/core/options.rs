//! SET command options.
//!
//! The conditional and expiry axes are closed enums, so combinations the
//! store's grammar forbids (`NX` with `XX`, two expiry tokens, `KEEPTTL`
//! with a count) cannot be built at all.

use std::time::Duration;

use bytes::Bytes;

use super::command::Cmd;
use crate::{Error, Result};

/// Condition under which SET applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalSet {
    /// Only set the key if it already exists (`XX`).
    OnlyIfExists,
    /// Only set the key if it does not already exist (`NX`).
    OnlyIfDoesNotExist,
}

impl ConditionalSet {
    fn token(self) -> &'static str {
        match self {
            ConditionalSet::OnlyIfExists => "XX",
            ConditionalSet::OnlyIfDoesNotExist => "NX",
        }
    }
}

/// Expiry to attach to a SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expire after this many seconds (`EX`).
    Seconds(u64),
    /// Expire after this many milliseconds (`PX`).
    Milliseconds(u64),
    /// Expire at this Unix time in seconds (`EXAT`).
    UnixSeconds(u64),
    /// Expire at this Unix time in milliseconds (`PXAT`).
    UnixMilliseconds(u64),
    /// Keep the TTL the key already has (`KEEPTTL`).
    KeepExisting,
}

impl Expiry {
    /// Relative expiry from a duration.
    ///
    /// Whole seconds encode as `EX`; anything with sub-second precision as `PX`.
    pub fn from_duration(duration: Duration) -> Self {
        if duration.subsec_millis() == 0 {
            Expiry::Seconds(duration.as_secs())
        } else {
            Expiry::Milliseconds(duration.as_millis().min(u64::MAX as u128) as u64)
        }
    }

    fn token(self) -> &'static str {
        match self {
            Expiry::Seconds(_) => "EX",
            Expiry::Milliseconds(_) => "PX",
            Expiry::UnixSeconds(_) => "EXAT",
            Expiry::UnixMilliseconds(_) => "PXAT",
            Expiry::KeepExisting => "KEEPTTL",
        }
    }

    fn count(self) -> Option<u64> {
        match self {
            Expiry::Seconds(n)
            | Expiry::Milliseconds(n)
            | Expiry::UnixSeconds(n)
            | Expiry::UnixMilliseconds(n) => Some(n),
            Expiry::KeepExisting => None,
        }
    }
}

/// Options for `SET`.
///
/// # Example
///
/// ```
/// use shardmux::{Expiry, SetOptions};
///
/// let options = SetOptions::new()
///     .only_if_exists()
///     .expiry(Expiry::Seconds(5));
/// let cmd = options.encode("key", "value").unwrap();
/// assert_eq!(cmd.args().len(), 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Existence condition, `None` for an unconditional set.
    pub conditional_set: Option<ConditionalSet>,
    /// Return the previous value instead of `OK` (`GET`).
    pub return_old_value: bool,
    /// Expiry to apply, `None` to clear any existing TTL.
    pub expiry: Option<Expiry>,
}

impl SetOptions {
    /// Creates options for an unconditional set without expiry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the existence condition.
    #[inline]
    pub fn conditional_set(mut self, condition: ConditionalSet) -> Self {
        self.conditional_set = Some(condition);
        self
    }

    /// Only set the key if it already exists.
    #[inline]
    pub fn only_if_exists(self) -> Self {
        self.conditional_set(ConditionalSet::OnlyIfExists)
    }

    /// Only set the key if it does not exist yet.
    #[inline]
    pub fn only_if_does_not_exist(self) -> Self {
        self.conditional_set(ConditionalSet::OnlyIfDoesNotExist)
    }

    /// Ask for the previous value in the reply.
    #[inline]
    pub fn return_old_value(mut self) -> Self {
        self.return_old_value = true;
        self
    }

    /// Sets the expiry.
    #[inline]
    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Encodes `SET key value` followed by these options.
    ///
    /// Tokens follow the store's grammar:
    /// `SET key value [NX|XX] [GET] [EX s|PX ms|EXAT ts|PXAT ts|KEEPTTL]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the expiry count does not fit
    /// the store's signed 64-bit range.
    pub fn encode(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<Cmd> {
        let mut cmd = Cmd::new("SET").arg(key).arg(value);

        if let Some(condition) = self.conditional_set {
            cmd = cmd.arg(condition.token());
        }

        if self.return_old_value {
            cmd = cmd.arg("GET");
        }

        if let Some(expiry) = self.expiry {
            cmd = cmd.arg(expiry.token());
            if let Some(count) = expiry.count() {
                if count > i64::MAX as u64 {
                    return Err(Error::InvalidArgument {
                        message: format!(
                            "expiry count {count} exceeds the maximum of {}",
                            i64::MAX
                        ),
                    });
                }
                cmd = cmd.arg(count.to_string());
            }
        }

        Ok(cmd)
    }
}
