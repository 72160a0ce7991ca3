//! One side of the command/event link: handshake, identity pin, listener
//! dispatch, and delay-aware sending through a private pacer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use pacer::{Clock, Pacer};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::dialect::{names, Dialect, Message};
use crate::error::{ChannelError, ChannelResult};
use crate::transport::{Delivery, Origin, PeerHandle, Transport};

/// Lifecycle of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, transport listener not yet installed.
    Uninitialized,
    /// Listening; no valid handshake observed yet.
    AwaitingHandshake,
    /// Peer identity pinned; application traffic flows.
    Ready,
    /// Explicitly torn down; no further sends are attempted.
    TornDown,
}

/// Round-trip timing computed by the handshake initiator. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeLatency {
    pub send_ms: u64,
    pub response_ms: u64,
    pub total_ms: u64,
}

/// Events surfaced to whoever drives the endpoint via [`Endpoint::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel reached READY. Latency is present on the initiating side.
    Ready { latency: Option<HandshakeLatency> },
    /// The handshake deadline elapsed with no peer. Reported once.
    PeerUnreachable,
    /// A `__pong__` arrived for an outstanding `__ping__`.
    Pong { id: u64, elapsed_ms: u64 },
    /// Result of an `__exec__` the peer evaluated on our behalf.
    ExecResult { id: u64, result: Value },
    /// The peer announced its program began running.
    ProgramStarted,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub dialect: Dialect,
    /// Lite endpoints do not carry the gamepad passthrough; a `__gamepad__`
    /// message arriving at a lite endpoint is an unknown command.
    pub lite: bool,
    /// Bound on how long AWAITING_HANDSHAKE may last before [`Endpoint::poll`]
    /// reports the peer unreachable. `None` waits forever.
    pub handshake_deadline_ms: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Messenger,
            lite: false,
            handshake_deadline_ms: None,
        }
    }
}

/// Opt-in capability behind `__exec__`. Without one installed, exec
/// messages are logged and dropped; nothing is evaluated by default.
pub trait CodeExecutor: Send {
    fn execute(&mut self, code: &str) -> Result<Value, String>;
}

/// Application command handler. State is captured explicitly by the
/// closure; there is no implicit scope binding.
pub type CommandHandler = Box<dyn FnMut(&Value) + Send>;

type Hook = Box<dyn FnMut() + Send>;

enum ListenerSlot {
    Builtin,
    App(CommandHandler),
}

/// State a queued transmit closure needs after the endpoint has moved on:
/// the wire, the dialect, and whichever peer handle is current at fire time.
struct TransmitSeat {
    dialect: Dialect,
    transport: Arc<dyn Transport>,
    peer: Mutex<Option<PeerHandle>>,
}

impl TransmitSeat {
    fn transmit(&self, msg: &Message) -> ChannelResult<()> {
        let peer = *self.peer.lock();
        let Some(peer) = peer else {
            return Err(ChannelError::PeerUnknown {
                name: msg.name.clone(),
            });
        };
        self.transport.send_to(peer, self.dialect.encode(msg))
    }
}

#[derive(Clone, Copy)]
enum HandshakeRole {
    /// Responder, or an initiator that has not opened yet.
    Pending,
    /// Initiator waiting for (or having received) the token echo.
    Initiated { token: u64, start_ms: u64 },
}

pub struct Endpoint {
    config: EndpointConfig,
    clock: Arc<dyn Clock>,
    seat: Arc<TransmitSeat>,
    pacer: Pacer,
    listeners: HashMap<String, ListenerSlot>,
    state: ChannelState,
    /// Set once, immutable thereafter. Inbound traffic not matching it is
    /// silently dropped.
    pinned: Option<(PeerHandle, Origin)>,
    handshake: HandshakeRole,
    monitor_hook: Option<Hook>,
    program_hook: Option<Hook>,
    gamepad_hook: Option<CommandHandler>,
    executor: Option<Box<dyn CodeExecutor>>,
    events: VecDeque<ChannelEvent>,
    ping_sent_ms: Option<u64>,
    next_pong_id: u64,
    bound_at_ms: Option<u64>,
    unreachable_reported: bool,
}

impl Endpoint {
    pub fn new(config: EndpointConfig, clock: Arc<dyn Clock>, transport: Arc<dyn Transport>) -> Self {
        // The pacer stays dormant until READY so that application messages
        // queued early are buffered, never transmitted ahead of the handshake.
        let pacer = Pacer::with_auto_start(Arc::clone(&clock), false);
        let mut listeners = HashMap::new();
        let builtins = [
            names::HANDSHAKE,
            names::PING,
            names::PONG,
            names::START,
            names::STARTED,
            names::EXEC,
            names::EXEC_RESULT,
        ];
        for name in builtins {
            listeners.insert(name.to_string(), ListenerSlot::Builtin);
        }
        if !config.lite {
            listeners.insert(names::GAMEPAD.to_string(), ListenerSlot::Builtin);
        }
        let seat = Arc::new(TransmitSeat {
            dialect: config.dialect,
            transport,
            peer: Mutex::new(None),
        });
        Self {
            config,
            clock,
            seat,
            pacer,
            listeners,
            state: ChannelState::Uninitialized,
            pinned: None,
            handshake: HandshakeRole::Pending,
            monitor_hook: None,
            program_hook: None,
            gamepad_hook: None,
            executor: None,
            events: VecDeque::new(),
            ping_sent_ms: None,
            next_pong_id: 0,
            bound_at_ms: None,
            unreachable_reported: false,
        }
    }

    /// Marks the transport listener installed; the endpoint now awaits a
    /// handshake. Used by the responding side, which discovers its peer
    /// from the first valid handshake.
    pub fn bind(&mut self) {
        if self.state == ChannelState::Uninitialized {
            self.state = ChannelState::AwaitingHandshake;
            self.bound_at_ms = Some(self.clock.now_ms());
        }
    }

    /// [`Endpoint::bind`] for the initiating side, which is given the peer
    /// handle directly at spawn time.
    pub fn bind_to(&mut self, peer: PeerHandle) {
        self.bind();
        *self.seat.peer.lock() = Some(peer);
    }

    /// Sends `__handshake__` with a fresh token. Must precede any other
    /// traffic on the initiating side.
    pub fn open_handshake(&mut self) -> ChannelResult<()> {
        if self.state == ChannelState::TornDown {
            return Err(ChannelError::TornDown);
        }
        self.bind();
        let start_ms = self.clock.now_ms();
        let token = start_ms;
        self.handshake = HandshakeRole::Initiated { token, start_ms };
        let msg = Message::new(
            names::HANDSHAKE,
            json!({ "token": token, "start_time": start_ms }),
        );
        self.seat.transmit(&msg)
    }

    /// Registers an application command handler.
    ///
    /// Configuration mistakes (empty name, duplicate registration,
    /// shadowing a builtin) are logged and ignored; the first registration
    /// of a name always stays in effect.
    pub fn add_listener(&mut self, name: &str, handler: impl FnMut(&Value) + Send + 'static) {
        if name.is_empty() {
            warn!("rejecting listener registration with an empty name");
            return;
        }
        if self.listeners.contains_key(name) {
            warn!(command = name, "listener already registered; keeping the first");
            return;
        }
        self.listeners
            .insert(name.to_string(), ListenerSlot::App(Box::new(handler)));
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    /// Queues an outbound message.
    ///
    /// `__handshake__` is transmitted immediately regardless of state. Any
    /// other message goes straight out only when the channel is READY and
    /// `delay_ms` is zero; otherwise it is handed to the pacer — an
    /// optional WAIT followed by the transmit — which guarantees nothing
    /// application-level leaves before READY and that delayed messages
    /// keep their enqueue order.
    pub fn send(&mut self, name: &str, value: Value, delay_ms: u64) -> ChannelResult<()> {
        if self.state == ChannelState::TornDown {
            return Err(ChannelError::TornDown);
        }
        let msg = Message::new(name, value);
        if name == names::HANDSHAKE {
            return self.seat.transmit(&msg);
        }
        if self.state == ChannelState::Ready && delay_ms == 0 {
            return self.seat.transmit(&msg);
        }
        if delay_ms > 0 {
            self.pacer.enqueue_wait(delay_ms);
        }
        let seat = Arc::clone(&self.seat);
        self.pacer.enqueue_run(move || {
            if let Err(err) = seat.transmit(&msg) {
                error!(command = %msg.name, "queued transmit failed: {err}");
            }
        });
        Ok(())
    }

    /// Liveness probe. Elapsed time is reported via [`ChannelEvent::Pong`]
    /// when the reply arrives.
    pub fn ping(&mut self) -> ChannelResult<()> {
        self.ping_sent_ms = Some(self.clock.now_ms());
        self.send(names::PING, json!({}), 0)
    }

    /// Transport callback: one inbound message.
    ///
    /// Identity mismatches and pre-pin non-handshake traffic are silently
    /// dropped (expected noise on a shared transport). A name with no
    /// registered listener is a protocol violation and raised.
    pub fn receive(&mut self, delivery: Delivery) -> ChannelResult<()> {
        if self.state == ChannelState::TornDown {
            debug!("dropping delivery on torn-down endpoint");
            return Ok(());
        }
        let msg = self.config.dialect.decode(&delivery.payload)?;

        if let Some((handle, origin)) = &self.pinned {
            if *handle != delivery.from || *origin != delivery.origin {
                debug!(
                    from = %delivery.from,
                    origin = %delivery.origin,
                    "dropping message that does not match the pinned identity"
                );
                return Ok(());
            }
        } else if msg.name != names::HANDSHAKE {
            debug!(command = %msg.name, "dropping pre-handshake message");
            return Ok(());
        }

        let builtin = match self.listeners.get(&msg.name) {
            None => return Err(ChannelError::UnknownCommand { name: msg.name }),
            Some(ListenerSlot::Builtin) => true,
            Some(ListenerSlot::App(_)) => false,
        };
        if builtin {
            return self.dispatch_builtin(&delivery, &msg);
        }
        if let Some(ListenerSlot::App(handler)) = self.listeners.get_mut(&msg.name) {
            handler(&msg.value);
        }
        Ok(())
    }

    /// Drives timers and surfaces pending events. Call this regularly; it
    /// pumps the pacer (releasing any elapsed WAITs) and enforces the
    /// optional handshake deadline.
    pub fn poll(&mut self) -> Vec<ChannelEvent> {
        self.pacer.pump();
        if self.state == ChannelState::AwaitingHandshake && !self.unreachable_reported {
            if let (Some(deadline), Some(bound_at)) =
                (self.config.handshake_deadline_ms, self.bound_at_ms)
            {
                if self.clock.now_ms() >= bound_at.saturating_add(deadline) {
                    self.unreachable_reported = true;
                    warn!(deadline_ms = deadline, "handshake deadline passed; peer unreachable");
                    self.events.push_back(ChannelEvent::PeerUnreachable);
                }
            }
        }
        self.events.drain(..).collect()
    }

    /// Tears the channel down: stops the pacer, discards queued tasks, and
    /// refuses all further sends.
    pub fn teardown(&mut self) {
        if self.state == ChannelState::TornDown {
            return;
        }
        self.state = ChannelState::TornDown;
        self.pacer.stop();
        self.pacer.clear_all();
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }

    /// The pinned peer identity, once known.
    pub fn peer(&self) -> Option<&(PeerHandle, Origin)> {
        self.pinned.as_ref()
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Hook invoked first when `__start__` arrives.
    pub fn set_monitor_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.monitor_hook = Some(Box::new(hook));
    }

    /// Hook invoked after the monitor hook when `__start__` arrives.
    pub fn set_program_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.program_hook = Some(Box::new(hook));
    }

    /// Receiver for `__gamepad__` samples. Ignored on lite endpoints.
    pub fn set_gamepad_hook(&mut self, hook: impl FnMut(&Value) + Send + 'static) {
        if self.config.lite {
            warn!("lite endpoint does not carry the gamepad passthrough");
            return;
        }
        self.gamepad_hook = Some(Box::new(hook));
    }

    /// Installs the exec capability.
    pub fn set_executor(&mut self, executor: Box<dyn CodeExecutor>) {
        self.executor = Some(executor);
    }

    fn dispatch_builtin(&mut self, delivery: &Delivery, msg: &Message) -> ChannelResult<()> {
        match msg.name.as_str() {
            names::HANDSHAKE => self.handle_handshake(delivery, &msg.value),
            names::PING => {
                let id = self.next_pong_id;
                self.next_pong_id += 1;
                let reply = Message::new(
                    names::PONG,
                    json!({ "id": id, "time": self.clock.now_ms() }),
                );
                self.seat.transmit(&reply)
            }
            names::PONG => {
                match self.ping_sent_ms.take() {
                    Some(sent_ms) => {
                        let elapsed_ms = self.clock.now_ms().saturating_sub(sent_ms);
                        let id = msg.value.get("id").and_then(Value::as_u64).unwrap_or(0);
                        info!(id, elapsed_ms, "pong received");
                        self.events.push_back(ChannelEvent::Pong { id, elapsed_ms });
                    }
                    None => debug!("unsolicited pong ignored"),
                }
                Ok(())
            }
            names::START => {
                if let Some(hook) = self.monitor_hook.as_mut() {
                    hook();
                }
                if let Some(hook) = self.program_hook.as_mut() {
                    hook();
                }
                Ok(())
            }
            names::STARTED => {
                self.events.push_back(ChannelEvent::ProgramStarted);
                Ok(())
            }
            names::EXEC => self.handle_exec(&msg.value),
            names::EXEC_RESULT => {
                let id = msg.value.get("id").and_then(Value::as_u64);
                match id {
                    Some(id) => {
                        let result = msg.value.get("result").cloned().unwrap_or(Value::Null);
                        self.events.push_back(ChannelEvent::ExecResult { id, result });
                    }
                    None => debug!("exec result without an id ignored"),
                }
                Ok(())
            }
            names::GAMEPAD => {
                if let Some(hook) = self.gamepad_hook.as_mut() {
                    hook(&msg.value);
                } else {
                    debug!("gamepad sample dropped: no hook installed");
                }
                Ok(())
            }
            other => Err(ChannelError::UnknownCommand {
                name: other.to_string(),
            }),
        }
    }

    fn handle_handshake(&mut self, delivery: &Delivery, value: &Value) -> ChannelResult<()> {
        let now = self.clock.now_ms();
        match self.handshake {
            HandshakeRole::Initiated { token, start_ms } => {
                let echoed = value.get("token").and_then(Value::as_u64);
                if echoed != Some(token) {
                    warn!(expected = token, observed = ?echoed, "handshake token mismatch; reply ignored");
                    return Ok(());
                }
                self.pin(delivery.from, delivery.origin.clone());
                let ping_time = value.get("ping_time").and_then(Value::as_u64).unwrap_or(now);
                let latency = HandshakeLatency {
                    send_ms: ping_time.saturating_sub(start_ms),
                    response_ms: now.saturating_sub(ping_time),
                    total_ms: now.saturating_sub(start_ms),
                };
                info!(
                    send_ms = latency.send_ms,
                    response_ms = latency.response_ms,
                    total_ms = latency.total_ms,
                    "handshake round trip complete"
                );
                self.become_ready(Some(latency));
                Ok(())
            }
            HandshakeRole::Pending => {
                let Some(token) = value.get("token") else {
                    warn!("handshake missing token; ignored");
                    return Ok(());
                };
                self.pin(delivery.from, delivery.origin.clone());
                let reply = Message::new(
                    names::HANDSHAKE,
                    json!({
                        "token": token,
                        "start_time": value.get("start_time").cloned().unwrap_or(Value::Null),
                        "ping_time": now,
                    }),
                );
                self.seat.transmit(&reply)?;
                self.become_ready(None);
                Ok(())
            }
        }
    }

    fn handle_exec(&mut self, value: &Value) -> ChannelResult<()> {
        // Either a bare code string or {code, id}.
        let (code, id) = match value {
            Value::String(code) => (code.as_str(), None),
            Value::Object(obj) => {
                let code = obj.get("code").and_then(Value::as_str).ok_or(
                    ChannelError::MalformedEnvelope {
                        reason: "exec payload has no code string",
                    },
                )?;
                (code, obj.get("id").and_then(Value::as_u64))
            }
            _ => {
                return Err(ChannelError::MalformedEnvelope {
                    reason: "exec payload is neither a string nor an object",
                })
            }
        };
        let Some(executor) = self.executor.as_mut() else {
            warn!("exec request dropped: no code executor installed");
            return Ok(());
        };
        match executor.execute(code) {
            Ok(result) => {
                if let Some(id) = id {
                    let reply = Message::new(names::EXEC_RESULT, json!({ "id": id, "result": result }));
                    return self.seat.transmit(&reply);
                }
                Ok(())
            }
            Err(report) => {
                // Evaluation failures stay in the executing context's own
                // error channel; nothing goes back through the protocol.
                error!("exec evaluation failed: {report}");
                Ok(())
            }
        }
    }

    fn pin(&mut self, handle: PeerHandle, origin: Origin) {
        if self.pinned.is_none() {
            info!(peer = %handle, origin = %origin, "peer identity pinned");
            *self.seat.peer.lock() = Some(handle);
            self.pinned = Some((handle, origin));
        }
    }

    fn become_ready(&mut self, latency: Option<HandshakeLatency>) {
        if self.state == ChannelState::Ready {
            return;
        }
        self.state = ChannelState::Ready;
        self.events.push_back(ChannelEvent::Ready { latency });
        // Release anything buffered while the handshake was in flight.
        self.pacer.set_auto_start(true);
        self.pacer.start();
    }
}
