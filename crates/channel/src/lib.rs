//! Point-to-point command/event channel between a trusted host and an
//! isolated execution context.
//!
//! The pieces compose as follows:
//! * [`Endpoint`] – one side of the link: handshake state machine, peer
//!   identity pin, listener dispatch, and delay-aware sending through a
//!   private [`pacer::Pacer`].
//! * [`Dialect`] / [`Message`] – the logical envelope and its two wire
//!   spellings (`name` vs `command`).
//! * [`Transport`] – minimal injected delivery primitive; [`loopback`]
//!   provides the in-memory pair used by tests and demos.
//! * [`ChannelError`] – hard-error surface (protocol violations,
//!   not-ready transmits); configuration mistakes are logged no-ops and
//!   identity mismatches are silent drops, per the error taxonomy.

mod dialect;
mod endpoint;
mod error;
pub mod loopback;
mod transport;

pub use dialect::{names, Dialect, Message};
pub use endpoint::{
    ChannelEvent, ChannelState, CodeExecutor, CommandHandler, Endpoint, EndpointConfig,
    HandshakeLatency,
};
pub use error::{ChannelError, ChannelResult};
pub use transport::{Delivery, Origin, PeerHandle, Transport};
