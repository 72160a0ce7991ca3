//! Isolated-side runtime of the command channel.
//!
//! Injected into the execution context, the runtime builds the responding
//! [`channel::Endpoint`]: it discovers its peer from the first valid
//! handshake, answers the fixed builtin set (handshake echo, liveness ping,
//! program start, opt-in code exec), and lets per-domain frameworks layer
//! their own named commands on top via [`SandboxRuntime::add_command`].

use std::sync::Arc;

use anyhow::{anyhow, Result};
use channel::{
    names, ChannelEvent, ChannelResult, ChannelState, CodeExecutor, Delivery, Dialect, Endpoint,
    EndpointConfig, Transport,
};
use pacer::Clock;
use serde_json::{json, Value};
use tracing::warn;

pub struct SandboxRuntime {
    endpoint: Endpoint,
}

impl SandboxRuntime {
    pub fn builder() -> SandboxRuntimeBuilder {
        SandboxRuntimeBuilder::new()
    }

    /// Extension point for robot/game frameworks. Reserved protocol names
    /// and duplicates are refused (logged, no effect).
    pub fn add_command(&mut self, name: &str, handler: impl FnMut(&Value) + Send + 'static) {
        if names::is_reserved(name) {
            warn!(command = name, "refusing to register a reserved command");
            return;
        }
        self.endpoint.add_listener(name, handler);
    }

    /// Callback invoked first when the host sends `__start__`.
    pub fn on_monitor_start(&mut self, hook: impl FnMut() + Send + 'static) {
        self.endpoint.set_monitor_hook(hook);
    }

    /// Callback invoked after the monitor when the host sends `__start__`.
    pub fn on_program_start(&mut self, hook: impl FnMut() + Send + 'static) {
        self.endpoint.set_program_hook(hook);
    }

    /// Receiver for host gamepad samples (non-lite runtimes only).
    pub fn on_gamepad(&mut self, hook: impl FnMut(&Value) + Send + 'static) {
        self.endpoint.set_gamepad_hook(hook);
    }

    /// Announces to the host that the user program began running.
    pub fn notify_started(&mut self) -> ChannelResult<()> {
        self.endpoint.send(names::STARTED, json!({}), 0)
    }

    /// Pushes a named event toward the host (sensor values, game state),
    /// optionally delayed through the endpoint's pacer.
    pub fn send_event(&mut self, name: &str, value: Value, delay_ms: u64) -> ChannelResult<()> {
        self.endpoint.send(name, value, delay_ms)
    }

    /// Transport callback for inbound messages.
    pub fn receive(&mut self, delivery: Delivery) -> ChannelResult<()> {
        self.endpoint.receive(delivery)
    }

    /// Pumps timers and returns pending channel events (READY after the
    /// handshake, mostly).
    pub fn poll(&mut self) -> Vec<ChannelEvent> {
        self.endpoint.poll()
    }

    pub fn teardown(&mut self) {
        self.endpoint.teardown();
    }

    pub fn is_ready(&self) -> bool {
        self.endpoint.is_ready()
    }

    pub fn state(&self) -> ChannelState {
        self.endpoint.state()
    }
}

pub struct SandboxRuntimeBuilder {
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
    dialect: Dialect,
    lite: bool,
    executor: Option<Box<dyn CodeExecutor>>,
}

impl SandboxRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            clock: None,
            transport: None,
            dialect: Dialect::Messenger,
            lite: false,
            executor: None,
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

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn lite(mut self, lite: bool) -> Self {
        self.lite = lite;
        self
    }

    /// Opts the runtime into `__exec__` evaluation. Without an executor,
    /// exec requests are logged and dropped.
    pub fn executor(mut self, executor: Box<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<SandboxRuntime> {
        let clock = self.clock.ok_or_else(|| anyhow!("missing clock"))?;
        let transport = self.transport.ok_or_else(|| anyhow!("missing transport"))?;
        let config = EndpointConfig {
            dialect: self.dialect,
            lite: self.lite,
            // the responder waits for the host to make contact
            handshake_deadline_ms: None,
        };
        let mut endpoint = Endpoint::new(config, clock, transport);
        endpoint.bind();
        if let Some(executor) = self.executor {
            endpoint.set_executor(executor);
        }
        Ok(SandboxRuntime { endpoint })
    }
}

impl Default for SandboxRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
