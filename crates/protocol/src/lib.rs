//! Wire protocol spoken between gateway clients and the gateway.
//!
//! Clients connect with `?token=...`, then send [`InboundMessage`] JSON
//! payloads. Every reply is a [`ReplyFrame`] carrying a numeric `code`.

pub mod frame;
pub mod message;

use serde::{Deserialize, Serialize};

pub use {
    frame::{ReplyFrame, codes},
    message::{HttpMethod, InboundMessage, ProtocolError},
};

/// Query parameters accepted on the WebSocket upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

impl ConnectParams {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// The bearer token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_absent() {
        assert_eq!(ConnectParams::default().token(), None);
        assert_eq!(ConnectParams::with_token("").token(), None);
        assert_eq!(ConnectParams::with_token("abc").token(), Some("abc"));
    }

    #[test]
    fn deserializes_from_query_shape() {
        let params: ConnectParams =
            serde_json::from_value(serde_json::json!({ "token": "valid123" })).unwrap();
        assert_eq!(params.token(), Some("valid123"));
        let params: ConnectParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.token(), None);
    }
}
