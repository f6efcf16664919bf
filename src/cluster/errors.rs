//! Parsing of cluster redirect replies.
//!
//! - `MOVED <slot> <host>:<port>` - the slot has a new owner
//! - `ASK <slot> <host>:<port>` - the slot is mid-migration, ask the target once
//! - `TRYAGAIN ...` - migration in progress for a multi-key request, retry later
//!
//! Every other error reply is a plain store error.

/// A redirect carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Permanent: refresh the topology and retry against the new owner.
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node owning the slot.
        address: String,
    },
    /// Temporary: send ASKING then retry at `address`. The topology is
    /// left untouched.
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the importing node.
        address: String,
    },
    /// The command touched keys of a slot being migrated; resend as is.
    TryAgain,
}

impl Redirect {
    /// Parses an error reply payload into a redirect, if it is one.
    ///
    /// Malformed `MOVED`/`ASK` replies are not redirects; the caller
    /// reports them as store errors.
    pub fn parse(error_msg: &[u8]) -> Option<Self> {
        let msg = String::from_utf8_lossy(error_msg);
        let msg = msg.trim();

        if let Some(args) = msg.strip_prefix("MOVED ") {
            let (slot, address) = parse_redirect(args)?;
            return Some(Redirect::Moved { slot, address });
        }

        if let Some(args) = msg.strip_prefix("ASK ") {
            let (slot, address) = parse_redirect(args)?;
            return Some(Redirect::Ask { slot, address });
        }

        if msg == "TRYAGAIN" || msg.starts_with("TRYAGAIN ") {
            return Some(Redirect::TryAgain);
        }

        None
    }
}

/// Parses redirect arguments: "<slot> <host>:<port>".
fn parse_redirect(args: &str) -> Option<(u16, String)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }

    let slot: u16 = parts[0].parse().ok()?;
    if slot >= super::slot::SLOT_COUNT {
        return None;
    }

    // A redirect may name only ":port" when the node does not know its own host.
    let address = parts[1].to_string();
    if address.rsplit_once(':').map_or(true, |(_, port)| port.is_empty()) {
        return None;
    }

    Some((slot, address))
}
