//! Gateway: WebSocket front door that authenticates clients and turns their
//! JSON messages into HTTP calls against registered modules.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Build identity/module HTTP clients and the rate counter store
//! 3. Start the module registry refresh loop
//! 4. Serve `/health` and the `/ws` upgrade handler
//!
//! Per connection, `auth` runs the handshake, then `dispatch` handles each
//! message. Shared state lives in `state::GatewayState`.

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod registry;
pub mod server;
pub mod state;
pub mod throttle;
pub mod upstream;
pub mod ws;
