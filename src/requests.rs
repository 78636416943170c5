//! Requests the session issues on its own behalf.

use serde::Serialize;

/// Typehint of the handshake request.
pub const CONNECTION_INFO_REQ: &str = "ConnectionInfoReq";

/// First request on every connection: `{"typehint": "ConnectionInfoReq"}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfoRequest {
    typehint: &'static str,
}

impl Default for ConnectionInfoRequest {
    fn default() -> Self {
        Self {
            typehint: CONNECTION_INFO_REQ,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info_request_json() {
        let value = serde_json::to_value(ConnectionInfoRequest::default()).unwrap();
        assert_eq!(value, serde_json::json!({"typehint": "ConnectionInfoReq"}));
    }
}
