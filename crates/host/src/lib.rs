//! Trusted-side controller of the command channel.
//!
//! The host spawns the isolated context, so it knows the peer handle up
//! front: the controller builds the initiating [`channel::Endpoint`], opens
//! the handshake, and surfaces peer lifecycle as [`PeerEvent`]s drained by
//! the application loop. Application frameworks (robot motor commands,
//! sensor-value push, code-exec requests) register their handlers through
//! [`HostController::add_command`].

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use channel::{
    names, ChannelError, ChannelEvent, ChannelResult, ChannelState, Delivery, Dialect, Endpoint,
    EndpointConfig, HandshakeLatency, PeerHandle, Transport,
};
use pacer::Clock;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;
use tracing::warn;

/// How long the controller waits for the handshake before reporting the
/// peer unreachable.
pub const DEFAULT_HANDSHAKE_DEADLINE_MS: u64 = 10_000;

pub const DEFAULT_EVENT_BUDGET: usize = 32;

/// Peer lifecycle and reply events, drained via
/// [`HostController::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Handshake completed; the channel is READY.
    Ready { latency: Option<HandshakeLatency> },
    /// The handshake deadline elapsed with no response.
    Unreachable,
    /// Liveness reply with the measured round trip.
    Pong { id: u64, elapsed_ms: u64 },
    /// Result of an [`HostController::exec`] request.
    ExecResult { id: u64, result: Value },
    /// The sandbox announced its program began running.
    ProgramStarted,
}

impl From<ChannelEvent> for PeerEvent {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Ready { latency } => PeerEvent::Ready { latency },
            ChannelEvent::PeerUnreachable => PeerEvent::Unreachable,
            ChannelEvent::Pong { id, elapsed_ms } => PeerEvent::Pong { id, elapsed_ms },
            ChannelEvent::ExecResult { id, result } => PeerEvent::ExecResult { id, result },
            ChannelEvent::ProgramStarted => PeerEvent::ProgramStarted,
        }
    }
}

/// One gamepad reading forwarded to the sandbox as a diagnostic
/// passthrough (non-lite endpoints only).
#[derive(Debug, Clone, Default, Serialize)]
pub struct GamepadSample {
    pub buttons: Vec<bool>,
    pub axes: Vec<f64>,
}

pub struct HostController {
    endpoint: Endpoint,
    next_exec_id: u64,
    pending: VecDeque<PeerEvent>,
}

impl std::fmt::Debug for HostController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostController")
            .field("next_exec_id", &self.next_exec_id)
            .finish_non_exhaustive()
    }
}

impl HostController {
    pub fn builder() -> HostControllerBuilder {
        HostControllerBuilder::new()
    }

    /// Opens the handshake toward the spawned peer. Further application
    /// sends are buffered until the echo arrives.
    pub fn connect(&mut self) -> ChannelResult<()> {
        self.endpoint.open_handshake()
    }

    /// Registers an application command handler. Reserved protocol names
    /// are refused (logged, no effect), as are duplicates.
    pub fn add_command(&mut self, name: &str, handler: impl FnMut(&Value) + Send + 'static) {
        if names::is_reserved(name) {
            warn!(command = name, "refusing to register a reserved command");
            return;
        }
        self.endpoint.add_listener(name, handler);
    }

    /// Sends a named command, optionally delayed. Delayed commands keep
    /// their enqueue order, which is how timed sequences compose:
    /// `send_command("move", v, 0)` then `send_command("stop", v, 2000)`.
    pub fn send_command(&mut self, name: &str, value: Value, delay_ms: u64) -> ChannelResult<()> {
        self.endpoint.send(name, value, delay_ms)
    }

    /// Tells the sandbox to begin program execution.
    pub fn start_program(&mut self) -> ChannelResult<()> {
        self.endpoint.send(names::START, json!({}), 0)
    }

    /// Opportunistic liveness probe; the reply surfaces as
    /// [`PeerEvent::Pong`].
    pub fn ping(&mut self) -> ChannelResult<()> {
        self.endpoint.ping()
    }

    /// Requests evaluation of `code` in the sandbox. The result comes back
    /// as [`PeerEvent::ExecResult`] carrying the returned id.
    pub fn exec(&mut self, code: &str) -> ChannelResult<u64> {
        let id = self.next_exec_id;
        self.next_exec_id += 1;
        self.endpoint
            .send(names::EXEC, json!({ "code": code, "id": id }), 0)?;
        Ok(id)
    }

    /// Forwards a gamepad reading to the sandbox.
    pub fn send_gamepad(&mut self, sample: &GamepadSample) -> ChannelResult<()> {
        let value = serde_json::to_value(sample)
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        self.endpoint.send(names::GAMEPAD, value, 0)
    }

    /// Transport callback for inbound messages.
    pub fn receive(&mut self, delivery: Delivery) -> ChannelResult<()> {
        self.endpoint.receive(delivery)
    }

    /// Pumps timers and returns up to `budget` pending events; the rest
    /// stay queued for the next drain.
    pub fn drain_events(&mut self, budget: usize) -> SmallVec<[PeerEvent; 8]> {
        self.pending
            .extend(self.endpoint.poll().into_iter().map(PeerEvent::from));
        let take = budget.min(self.pending.len());
        self.pending.drain(..take).collect()
    }

    /// Tears the channel down; no further sends are attempted.
    pub fn disconnect(&mut self) {
        self.endpoint.teardown();
    }

    pub fn is_ready(&self) -> bool {
        self.endpoint.is_ready()
    }

    pub fn state(&self) -> ChannelState {
        self.endpoint.state()
    }
}

pub struct HostControllerBuilder {
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
    peer: Option<PeerHandle>,
    dialect: Dialect,
    lite: bool,
    handshake_deadline_ms: Option<u64>,
}

impl HostControllerBuilder {
    pub fn new() -> Self {
        Self {
            clock: None,
            transport: None,
            peer: None,
            dialect: Dialect::Messenger,
            lite: false,
            handshake_deadline_ms: Some(DEFAULT_HANDSHAKE_DEADLINE_MS),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Handle of the execution context this controller spawned.
    pub fn peer(mut self, peer: PeerHandle) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn lite(mut self, lite: bool) -> Self {
        self.lite = lite;
        self
    }

    /// Overrides or disables the handshake deadline.
    pub fn handshake_deadline_ms(mut self, deadline: Option<u64>) -> Self {
        self.handshake_deadline_ms = deadline;
        self
    }

    pub fn build(self) -> Result<HostController> {
        let clock = self.clock.ok_or_else(|| anyhow!("missing clock"))?;
        let transport = self.transport.ok_or_else(|| anyhow!("missing transport"))?;
        let peer = self.peer.ok_or_else(|| anyhow!("missing peer handle"))?;
        let config = EndpointConfig {
            dialect: self.dialect,
            lite: self.lite,
            handshake_deadline_ms: self.handshake_deadline_ms,
        };
        let mut endpoint = Endpoint::new(config, clock, transport);
        endpoint.bind_to(peer);
        Ok(HostController {
            endpoint,
            next_exec_id: 0,
            pending: VecDeque::new(),
        })
    }
}

impl Default for HostControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
