//! In-memory transport pair.
//!
//! Backs tests and demos with the same asynchronous-delivery contract a
//! real frame/worker wire has: `send_to` only queues; the owner of the
//! receiving side drains explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ChannelError, ChannelResult};
use crate::transport::{Delivery, Origin, PeerHandle, Transport};

#[derive(Default)]
struct Queues {
    inboxes: HashMap<u64, VecDeque<Delivery>>,
}

/// One side of an in-memory pair. Cloneable; clones share the same queues.
#[derive(Clone)]
pub struct LoopbackPort {
    queues: Arc<Mutex<Queues>>,
    me: PeerHandle,
    origin: Origin,
}

impl LoopbackPort {
    pub fn handle(&self) -> PeerHandle {
        self.me
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Takes every delivery queued for this side, in arrival order.
    pub fn drain(&self) -> Vec<Delivery> {
        let mut queues = self.queues.lock();
        queues
            .inboxes
            .get_mut(&self.me.0)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries waiting for this side.
    pub fn pending(&self) -> usize {
        self.queues.lock().inboxes.get(&self.me.0).map_or(0, VecDeque::len)
    }

    /// Queues an arbitrary delivery for this side, bypassing the sending
    /// port. Lets tests present forged sender identities.
    pub fn inject(&self, delivery: Delivery) {
        self.queues
            .lock()
            .inboxes
            .entry(self.me.0)
            .or_default()
            .push_back(delivery);
    }
}

impl Transport for LoopbackPort {
    fn send_to(&self, peer: PeerHandle, payload: Value) -> ChannelResult<()> {
        let mut queues = self.queues.lock();
        if peer == self.me {
            return Err(ChannelError::Transport(format!(
                "{peer} attempted to send to itself"
            )));
        }
        queues.inboxes.entry(peer.0).or_default().push_back(Delivery {
            from: self.me,
            origin: self.origin.clone(),
            payload,
        });
        Ok(())
    }
}

/// Builds a connected pair of ports with handles 1 and 2.
pub fn pair(origin_a: &str, origin_b: &str) -> (LoopbackPort, LoopbackPort) {
    let queues = Arc::new(Mutex::new(Queues::default()));
    let a = LoopbackPort {
        queues: Arc::clone(&queues),
        me: PeerHandle(1),
        origin: Origin::new(origin_a),
    };
    let b = LoopbackPort {
        queues,
        me: PeerHandle(2),
        origin: Origin::new(origin_b),
    };
    (a, b)
}
