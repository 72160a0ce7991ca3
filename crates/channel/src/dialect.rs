//! Logical message envelope and its two historical wire spellings.

use serde_json::{Map, Value};

use crate::error::{ChannelError, ChannelResult};

/// Reserved command names. Application frameworks must not reuse these;
/// the endpoint pre-registers them at construction.
pub mod names {
    pub const HANDSHAKE: &str = "__handshake__";
    pub const PING: &str = "__ping__";
    pub const PONG: &str = "__pong__";
    pub const START: &str = "__start__";
    pub const STARTED: &str = "__started__";
    pub const EXEC: &str = "__exec__";
    pub const EXEC_RESULT: &str = "__exec_result__";
    pub const GAMEPAD: &str = "__gamepad__";

    pub fn is_reserved(name: &str) -> bool {
        matches!(
            name,
            HANDSHAKE | PING | PONG | START | STARTED | EXEC | EXEC_RESULT | GAMEPAD
        )
    }
}

/// One named message. `value` defaults to an empty object when the sender
/// omits it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub name: String,
    pub value: Value,
}

impl Message {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Message with an empty-object value.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Object(Map::new()))
    }
}

/// Wire spelling of the envelope's name field.
///
/// The two source variants carried structurally identical envelopes that
/// differed only in this key; one endpoint type serves both by picking the
/// dialect at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `{ "name": ..., "value": ... }`
    Messenger,
    /// `{ "command": ..., "value": ... }`
    Runner,
}

impl Dialect {
    pub const fn field(self) -> &'static str {
        match self {
            Dialect::Messenger => "name",
            Dialect::Runner => "command",
        }
    }

    pub fn encode(self, msg: &Message) -> Value {
        let mut obj = Map::with_capacity(2);
        obj.insert(self.field().to_string(), Value::String(msg.name.clone()));
        obj.insert("value".to_string(), msg.value.clone());
        Value::Object(obj)
    }

    pub fn decode(self, raw: &Value) -> ChannelResult<Message> {
        let obj = raw.as_object().ok_or(ChannelError::MalformedEnvelope {
            reason: "envelope is not a JSON object",
        })?;
        let name = obj
            .get(self.field())
            .and_then(Value::as_str)
            .ok_or(ChannelError::MalformedEnvelope {
                reason: "envelope name field missing or not a string",
            })?;
        if name.is_empty() {
            return Err(ChannelError::MalformedEnvelope {
                reason: "envelope name is empty",
            });
        }
        let value = obj
            .get("value")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok(Message::new(name, value))
    }
}
