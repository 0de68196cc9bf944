use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use {
    tokio::sync::{RwLock, mpsc},
    tracing::debug,
};

use {gatehouse_config::RejectMode, gatehouse_protocol::ReplyFrame};

use crate::{
    auth::Session, identity::IdentityClient, registry::ModuleRegistry, throttle::RateLimiter,
    upstream::ModuleClient,
};

// ── Connected client ─────────────────────────────────────────────────────────

/// Instructions for a connection's write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized JSON frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close,
}

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Channel feeding this client's write loop.
    pub sender: mpsc::UnboundedSender<Outbound>,
    /// Bound once the handshake succeeds.
    pub session: Option<Arc<Session>>,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    pub fn new(conn_id: impl Into<String>, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            conn_id: conn_id.into(),
            sender,
            session: None,
            remote_addr: None,
            connected_at: Instant::now(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Queue a frame for this client.
    pub fn send(&self, frame: &ReplyFrame) -> bool {
        self.sender.send(Outbound::Frame(frame.to_json())).is_ok()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.user_id.as_str())
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// All connected WebSocket clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Connections of each authenticated user.
    pub by_user: RwLock<HashMap<String, HashSet<String>>>,
    pub registry: Arc<ModuleRegistry>,
    pub limiter: RateLimiter,
    pub identity: Arc<IdentityClient>,
    pub upstream: ModuleClient,
    /// What a throttled client hears back.
    pub reject_mode: RejectMode,
    /// Server version string.
    pub version: String,
}

impl GatewayState {
    pub fn new(
        identity: Arc<IdentityClient>,
        registry: Arc<ModuleRegistry>,
        limiter: RateLimiter,
        upstream: ModuleClient,
        reject_mode: RejectMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            registry,
            limiter,
            identity,
            upstream,
            reject_mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Register a new client connection.
    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    /// Attach an authenticated session and index the connection under its
    /// user. Returns false when the connection is already gone.
    ///
    /// Lock order is `clients` then `by_user`, held together, so a concurrent
    /// removal never leaves a user index entry behind.
    pub async fn bind_session(&self, conn_id: &str, session: Session) -> bool {
        let mut clients = self.clients.write().await;
        let Some(client) = clients.get_mut(conn_id) else {
            return false;
        };
        let user_id = session.user_id.clone();
        client.session = Some(Arc::new(session));
        self.by_user
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    pub async fn session(&self, conn_id: &str) -> Option<Arc<Session>> {
        self.clients
            .read()
            .await
            .get(conn_id)
            .and_then(|c| c.session.clone())
    }

    /// Send a frame to one connection. Unknown or closed connections are a
    /// no-op returning false.
    pub async fn send_to(&self, conn_id: &str, frame: &ReplyFrame) -> bool {
        let sent = self
            .clients
            .read()
            .await
            .get(conn_id)
            .is_some_and(|c| c.send(frame));
        if !sent {
            debug!(conn_id, code = frame.code, "dropping frame for closed connection");
        }
        sent
    }

    /// Send a frame to every connection of a user. Returns how many accepted it.
    pub async fn send_to_user(&self, user_id: &str, frame: &ReplyFrame) -> usize {
        let conn_ids: Vec<String> = match self.by_user.read().await.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return 0,
        };
        let clients = self.clients.read().await;
        conn_ids
            .iter()
            .filter_map(|id| clients.get(id))
            .filter(|c| c.send(frame))
            .count()
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        let mut clients = self.clients.write().await;
        let client = clients.remove(conn_id)?;
        if let Some(user_id) = client.user_id() {
            let mut by_user = self.by_user.write().await;
            if let Some(ids) = by_user.get_mut(user_id) {
                ids.remove(conn_id);
                if ids.is_empty() {
                    by_user.remove(user_id);
                }
            }
        }
        Some(client)
    }

    /// Close a client: optionally send a final frame, tell the write loop to
    /// close, then forget the connection.
    pub async fn close_client(
        &self,
        conn_id: &str,
        final_frame: Option<ReplyFrame>,
    ) -> Option<ConnectedClient> {
        let client = self.remove_client(conn_id).await?;
        if let Some(frame) = final_frame {
            client.send(&frame);
        }
        let _ = client.sender.send(Outbound::Close);
        Some(client)
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_connected(&self, conn_id: &str) -> bool {
        self.clients.read().await.contains_key(conn_id)
    }
}
