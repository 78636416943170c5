//! Routes received envelopes to the correlation registry or the response handler.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::{decode_envelope, typehint, CallId, Envelope};
use super::registry::{CorrelationRegistry, ResponseSlot};

/// Receives payloads that are not claimed by a waiter, plus the payloads of
/// responses a waiter resolved.
pub trait ResponseHandler: Send + Sync {
    fn handle_incoming_response(&self, call_id: Option<CallId>, payload: &Value);
}

/// How a single envelope was routed.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Stored in the registry under this call id
    Correlated(CallId),
    /// Forwarded to the handler
    Unsolicited,
    /// Neither call id nor payload
    Dropped,
}

/// Classifies envelopes for the receiver loop.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CorrelationRegistry>,
    handler: Arc<dyn ResponseHandler>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CorrelationRegistry>, handler: Arc<dyn ResponseHandler>) -> Self {
        Self { registry, handler }
    }

    /// Decode and route one frame. Malformed frames are logged and skipped.
    pub fn dispatch_text(&self, text: &str) -> Option<Dispatch> {
        match decode_envelope(text) {
            Ok(envelope) => Some(self.dispatch(envelope)),
            Err(e) => {
                warn!(error = %e, frame = %text.trim_end(), "Skipping malformed frame");
                None
            }
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> Dispatch {
        if let Some(call_id) = envelope.call_id {
            let slot = ResponseSlot::from(envelope);
            debug!(call_id, nil = matches!(slot, ResponseSlot::Nil), "Storing correlated response");
            self.registry.insert(call_id, slot);
            return Dispatch::Correlated(call_id);
        }

        match envelope.payload {
            Some(payload) => {
                debug!(typehint = typehint(&payload).unwrap_or("<none>"), "Unsolicited message");
                self.handler.handle_incoming_response(None, &payload);
                Dispatch::Unsolicited
            }
            None => {
                debug!("Dropping envelope with neither callId nor payload");
                Dispatch::Dropped
            }
        }
    }
}

type HandlerFn = Box<dyn Fn(Option<CallId>, &Value) + Send + Sync>;

/// `ResponseHandler` dispatching on the payload `typehint`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerFn>,
    fallback: Option<HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle payloads whose `typehint` equals `typehint`.
    pub fn on<F>(self, typehint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<CallId>, &Value) + Send + Sync + 'static,
    {
        self.handlers.insert(typehint.into(), Box::new(handler));
        self
    }

    /// Handle payloads no typed handler claims.
    pub fn with_fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(Option<CallId>, &Value) + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }
}

impl ResponseHandler for HandlerRegistry {
    fn handle_incoming_response(&self, call_id: Option<CallId>, payload: &Value) {
        let hint = typehint(payload);
        if let Some(handler) = hint.and_then(|h| self.handlers.get(h)) {
            (handler.value())(call_id, payload);
            return;
        }
        match &self.fallback {
            Some(fallback) => fallback(call_id, payload),
            None => debug!(call_id = ?call_id, typehint = ?hint, "No handler registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Option<CallId>, Value)>>,
    }

    impl ResponseHandler for Recorder {
        fn handle_incoming_response(&self, call_id: Option<CallId>, payload: &Value) {
            self.calls.lock().unwrap().push((call_id, payload.clone()));
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<CorrelationRegistry>, Arc<Recorder>) {
        let registry = Arc::new(CorrelationRegistry::new());
        let recorder = Arc::new(Recorder::default());
        (
            Dispatcher::new(registry.clone(), recorder.clone()),
            registry,
            recorder,
        )
    }

    #[test]
    fn test_correlated_goes_to_registry_only() {
        let (dispatcher, registry, recorder) = dispatcher();
        let routed = dispatcher.dispatch_text(r#"{"callId": 4, "payload": {"typehint": "Ok"}}"#);

        assert_eq!(routed, Some(Dispatch::Correlated(4)));
        assert!(matches!(registry.get(4), Some(ResponseSlot::Response(_))));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_nil_payload_stored_as_sentinel() {
        let (dispatcher, registry, _) = dispatcher();
        dispatcher.dispatch_text(r#"{"callId": 2, "payload": "nil"}"#);
        assert_eq!(registry.get(2), Some(ResponseSlot::Nil));
    }

    #[test]
    fn test_unsolicited_goes_to_handler_once() {
        let (dispatcher, registry, recorder) = dispatcher();
        let payload = json!({"typehint": "IndexerReadyEvent"});
        let routed = dispatcher.dispatch_text(&json!({"payload": payload}).to_string());

        assert_eq!(routed, Some(Dispatch::Unsolicited));
        assert!(registry.is_empty());
        assert_eq!(*recorder.calls.lock().unwrap(), vec![(None, payload)]);
    }

    #[test]
    fn test_empty_envelope_dropped() {
        let (dispatcher, registry, recorder) = dispatcher();
        assert_eq!(dispatcher.dispatch_text("{}"), Some(Dispatch::Dropped));
        assert!(registry.is_empty());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frame_skipped() {
        let (dispatcher, registry, recorder) = dispatcher();
        assert_eq!(dispatcher.dispatch_text("{\"callId\": "), None);
        assert!(registry.is_empty());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_registry_routes_by_typehint() {
        let typed = Arc::new(Mutex::new(Vec::new()));
        let fallback = Arc::new(Mutex::new(Vec::new()));
        let typed_sink = typed.clone();
        let fallback_sink = fallback.clone();

        let handlers = HandlerRegistry::new()
            .on("SendBackgroundMessageEvent", move |call_id, payload| {
                typed_sink.lock().unwrap().push((call_id, payload.clone()));
            })
            .with_fallback(move |call_id, payload| {
                fallback_sink.lock().unwrap().push((call_id, payload.clone()));
            });

        let event = json!({"typehint": "SendBackgroundMessageEvent", "detail": "indexing"});
        handlers.handle_incoming_response(None, &event);
        handlers.handle_incoming_response(Some(3), &json!({"typehint": "Unknown"}));
        handlers.handle_incoming_response(Some(4), &json!("no typehint"));

        assert_eq!(*typed.lock().unwrap(), vec![(None, event)]);
        assert_eq!(fallback.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_handler_registry_without_fallback_ignores_unknown() {
        let handlers = HandlerRegistry::new();
        handlers.handle_incoming_response(None, &json!({"typehint": "Unknown"}));
    }
}
