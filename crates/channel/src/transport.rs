//! Minimal transport seam the endpoint is built against.
//!
//! The endpoint never talks to a concrete hosting mechanism (frame, worker,
//! process, socket); it is handed a [`Transport`] at construction and is
//! fed inbound [`Delivery`] values by whoever owns the real wire.

use std::fmt;

use serde_json::Value;

use crate::error::ChannelResult;

/// Opaque identity of one endpoint on a shared transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u64);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Origin tag the transport attaches to every message it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a receiving endpoint sees for each arrived message: the sender's
/// handle and origin (checked against the identity pin) plus the raw
/// envelope payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: PeerHandle,
    pub origin: Origin,
    pub payload: Value,
}

/// Outbound half of the wire. Delivery is always asynchronous relative to
/// `send_to`; the transport attaches the sender's handle and origin so the
/// receiver can verify them.
pub trait Transport: Send + Sync {
    fn send_to(&self, peer: PeerHandle, payload: Value) -> ChannelResult<()>;
}
