//! Connection handshake: validate the client's token with the identity
//! service and bind the resulting session.

use std::sync::Arc;

use {
    serde_json::{Map, Value},
    tracing::{debug, info, warn},
};

use gatehouse_protocol::{ConnectParams, ReplyFrame};

use crate::{error::GatewayError, identity::Identity, state::GatewayState};

// ── Types ────────────────────────────────────────────────────────────────────

/// An authenticated user bound to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// String key used for counters, indexing and the `X-User-Id` header.
    pub user_id: String,
    /// The identity service's `id` exactly as received; injected into
    /// forwarded bodies.
    pub raw_id: Value,
    /// Full identity response.
    pub attributes: Map<String, Value>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        raw_id: Value,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            raw_id,
            attributes,
        }
    }
}

impl From<Identity> for Session {
    fn from(identity: Identity) -> Self {
        Self::new(identity.user_id, identity.raw_id, identity.attributes)
    }
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Resolve the connect parameters to a session. A missing token fails
/// without touching the network.
pub async fn authenticate(
    state: &GatewayState,
    params: &ConnectParams,
) -> Result<Session, GatewayError> {
    let Some(token) = params.token() else {
        return Err(GatewayError::AuthFailure("no token supplied".into()));
    };
    state
        .identity
        .verify_token(token)
        .await
        .map(Session::from)
        .map_err(|e| GatewayError::from_identity(&e))
}

/// Run the handshake for a registered connection. On success the session is
/// bound, the user indexed and Hello sent; on failure the client gets the
/// matching reply and the connection is closed.
pub async fn on_connect(
    state: &Arc<GatewayState>,
    conn_id: &str,
    params: &ConnectParams,
) -> bool {
    match authenticate(state, params).await {
        Ok(session) => {
            let user_id = session.user_id.clone();
            if !state.bind_session(conn_id, session).await {
                debug!(conn_id, user_id, "connection closed during handshake");
                return false;
            }
            info!(conn_id, user_id, "client authenticated");
            state.send_to(conn_id, &ReplyFrame::hello()).await;
            true
        },
        Err(e) => {
            warn!(conn_id, error = %e, "handshake rejected");
            state.close_client(conn_id, Some(e.to_frame())).await;
            false
        },
    }
}
