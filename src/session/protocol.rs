//! Wire envelopes.
//!
//! Outgoing: `{"callId": <id>, "req": <request>}`
//! Incoming: `{"callId": <id, optional>, "payload": <object, optional>}`
//!
//! Frames are JSON text; the session manager terminates each outgoing frame
//! with a newline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation identifier assigned to each outgoing request.
pub type CallId = u64;

/// Legacy payload meaning "not answered yet, keep waiting".
pub const NIL_SENTINEL: &str = "nil";

/// Field of a payload object naming its message type.
pub const TYPEHINT_FIELD: &str = "typehint";

#[derive(Serialize)]
struct RequestEnvelope<'a, T: Serialize + ?Sized> {
    #[serde(rename = "callId")]
    call_id: CallId,
    req: &'a T,
}

/// Incoming message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Whether the payload is the nil sentinel.
    pub fn is_nil(&self) -> bool {
        matches!(&self.payload, Some(Value::String(s)) if s == NIL_SENTINEL)
    }

    pub fn typehint(&self) -> Option<&str> {
        self.payload.as_ref().and_then(typehint)
    }
}

/// Serialize a request under its call id.
pub fn encode_request<T: Serialize + ?Sized>(
    call_id: CallId,
    request: &T,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RequestEnvelope {
        call_id,
        req: request,
    })
}

/// Parse one received frame.
pub fn decode_envelope(text: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(text)
}

/// The `typehint` discriminator of a payload, if it has one.
pub fn typehint(payload: &Value) -> Option<&str> {
    payload.get(TYPEHINT_FIELD).and_then(Value::as_str)
}
