//! Error surface of the channel.
//!
//! Only hard failures appear here: protocol violations (unknown command,
//! garbled envelope) and transmits attempted before a peer is known.
//! Configuration mistakes and identity mismatches are handled locally by
//! the endpoint and never escape.

use thiserror::Error;

/// Convenience alias for fallible channel operations.
pub type ChannelResult<T, E = ChannelError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message named a command with no registered listener. Usually a
    /// version skew between the two sides, so it is raised loudly rather
    /// than dropped.
    #[error("no listener registered for command `{name}`")]
    UnknownCommand { name: String },

    /// The transport handed over something that does not decode as an
    /// envelope of the configured dialect.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: &'static str },

    /// A transmit was attempted before any peer handle is known, outside
    /// the handshake path.
    #[error("cannot transmit `{name}`: peer handle not yet known")]
    PeerUnknown { name: String },

    /// The endpoint was torn down; no further sends are attempted.
    #[error("endpoint is torn down")]
    TornDown,

    /// The underlying transport refused the message.
    #[error("transport rejected the message: {0}")]
    Transport(String),
}
