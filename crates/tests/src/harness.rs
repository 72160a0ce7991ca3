//! Shared wiring: a host controller and a sandbox runtime joined by the
//! in-memory loopback transport, all on one manual clock.

use std::sync::Arc;

use channel::loopback::{self, LoopbackPort};
use channel::{CodeExecutor, Dialect};
use host::HostController;
use pacer::{Clock, ManualClock};
use sandbox::SandboxRuntime;
use serde_json::{json, Value};

/// Integer sum evaluator standing in for the sandbox's script engine.
pub struct MiniCalc;

impl CodeExecutor for MiniCalc {
    fn execute(&mut self, code: &str) -> Result<Value, String> {
        let mut total = 0i64;
        for part in code.split('+') {
            total += part
                .trim()
                .parse::<i64>()
                .map_err(|err| format!("bad operand `{part}`: {err}"))?;
        }
        Ok(json!(total))
    }
}

pub struct Pair {
    pub host: HostController,
    pub sandbox: SandboxRuntime,
    /// Inbox of the host side.
    pub host_inbox: LoopbackPort,
    /// Inbox of the sandbox side.
    pub sandbox_inbox: LoopbackPort,
    pub clock: Arc<ManualClock>,
}

/// Builds an unconnected pair speaking the given dialect. The sandbox
/// carries a [`MiniCalc`] executor so exec round trips can be exercised.
pub fn pair(dialect: Dialect) -> Pair {
    let clock = Arc::new(ManualClock::new());
    let (host_port, sandbox_port) = loopback::pair("https://editor.test", "https://frame.test");

    let host = HostController::builder()
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .transport(Arc::new(host_port.clone()))
        .peer(sandbox_port.handle())
        .dialect(dialect)
        .build()
        .expect("host builder");

    let sandbox = SandboxRuntime::builder()
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .transport(Arc::new(sandbox_port.clone()))
        .dialect(dialect)
        .executor(Box::new(MiniCalc))
        .build()
        .expect("sandbox builder");

    Pair {
        host,
        sandbox,
        host_inbox: host_port,
        sandbox_inbox: sandbox_port,
        clock,
    }
}

/// Shuttles queued deliveries both ways until the wire is quiet.
pub fn shuttle(p: &mut Pair) {
    loop {
        let mut moved = false;
        for delivery in p.sandbox_inbox.drain() {
            p.sandbox.receive(delivery).expect("sandbox receive");
            moved = true;
        }
        for delivery in p.host_inbox.drain() {
            p.host.receive(delivery).expect("host receive");
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

/// Builds a pair and completes the handshake.
pub fn connected_pair(dialect: Dialect) -> Pair {
    let mut p = pair(dialect);
    p.host.connect().expect("open handshake");
    shuttle(&mut p);
    assert!(p.host.is_ready(), "host must reach READY");
    assert!(p.sandbox.is_ready(), "sandbox must reach READY");
    p
}
