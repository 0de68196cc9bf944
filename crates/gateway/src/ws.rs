use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use gatehouse_protocol::{ConnectParams, ReplyFrame};

use crate::{
    auth,
    dispatch,
    state::{ConnectedClient, GatewayState, Outbound},
};

/// Drive one WebSocket connection from upgrade to disconnect.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    params: ConnectParams,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, remote = %remote_addr, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Write loop: everything for this client goes through the channel.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        debug!(conn_id = %write_conn_id, "ws: write failed");
                        break;
                    }
                },
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                },
            }
        }
    });

    state
        .register_client(ConnectedClient::new(&conn_id, tx).with_remote_addr(remote_addr))
        .await;

    if auth::on_connect(&state, &conn_id, &params).await {
        while let Some(msg) = ws_rx.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        state.send_to(&conn_id, &ReplyFrame::incomplete()).await;
                        continue;
                    },
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "ws: read error");
                    break;
                },
            };
            // The returned task finishes on its own; the read loop never waits on it.
            let _ = dispatch::on_message(&state, &conn_id, &text).await;
            if !state.is_connected(&conn_id).await {
                break;
            }
        }
    }

    if let Some(client) = state.remove_client(&conn_id).await {
        info!(
            conn_id = %conn_id,
            remote = ?client.remote_addr,
            user_id = client.user_id().unwrap_or("-"),
            connected_secs = client.connected_at.elapsed().as_secs(),
            "ws: connection closed"
        );
    }
    // Dropping the last sender ends the write loop after queued frames drain.
    let _ = write_handle.await;
}
