//! End-to-end tests over a real socket: axum server, WebSocket client,
//! mocked identity service and module backend.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    gatehouse_config::RejectMode,
    gatehouse_gateway::{
        identity::IdentityClient,
        registry::{Module, ModuleRegistry, ModuleSnapshot},
        server::build_gateway_app,
        state::GatewayState,
        throttle::{MemoryCounterStore, RateLimiter},
        upstream::ModuleClient,
    },
};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start(
    identity_url: &str,
    module_url: &str,
    limit: u32,
) -> (SocketAddr, Arc<GatewayState>) {
    let identity = Arc::new(
        IdentityClient::new(
            identity_url,
            Some("svc"),
            Duration::from_secs(5),
            "LAE-Gateway",
        )
        .unwrap(),
    );
    let registry = Arc::new(ModuleRegistry::with_snapshot(ModuleSnapshot::from_modules([
        Module::new("7", module_url, "t7"),
    ])));
    let limiter = RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        limit,
        Duration::from_secs(60),
    );
    let upstream = ModuleClient::new(Duration::from_secs(5), "LAE-Gateway").unwrap();
    let state = GatewayState::new(identity, registry, limiter, upstream, RejectMode::Silent);

    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn next_json(ws: &mut Client) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn identity_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/token/valid123")
        .match_header("authorization", "Bearer svc")
        .with_status(200)
        .with_body(r#"{"id":42}"#)
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn authenticated_request_round_trip() {
    let identity = identity_server().await;
    let mut backend = mockito::Server::new_async().await;
    let call = backend
        .mock("POST", "/remote/functions/list")
        .match_header("x-user-id", "42")
        .match_header("x-module-api-token", "t7")
        .match_body(mockito::Matcher::Json(json!({ "page": 1, "user_id": 42 })))
        .with_status(200)
        .with_body(r#"{"items":[1,2]}"#)
        .create_async()
        .await;
    let (addr, _state) = start(&identity.url(), &backend.url(), 20).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token=valid123"))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "code": 200, "msg": "authed" }));

    let request = json!({
        "method": "POST",
        "module_id": 7,
        "path": "list",
        "data": { "page": 1 },
        "request_id": "r1",
    });
    ws.send(Message::Text(request.to_string().into())).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "code": 201, "request_id": "r1" })
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "code": 200, "data": { "items": [1, 2] }, "request_id": "r1" })
    );
    call.assert_async().await;
}

#[tokio::test]
async fn missing_token_is_closed_with_401() {
    let identity = identity_server().await;
    let (addr, state) = start(&identity.url(), "http://127.0.0.1:9", 20).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "code": 401, "msg": "Unauthorized" })
    );
    let closing = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    assert_eq!(state.client_count().await, 0);
}

#[tokio::test]
async fn rejected_messages_keep_the_connection_open() {
    let identity = identity_server().await;
    let (addr, state) = start(&identity.url(), "http://127.0.0.1:9", 20).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token=valid123"))
        .await
        .unwrap();
    next_json(&mut ws).await;

    ws.send(Message::Text("{}".into())).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "code": 400, "msg": "Incomplete" })
    );

    let unknown = json!({ "method": "get", "module_id": 99, "path": "x", "request_id": "r2" });
    ws.send(Message::Text(unknown.to_string().into())).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "code": 404, "msg": "Module Not Found", "request_id": "r2" })
    );
    assert_eq!(state.client_count().await, 1);
}

#[tokio::test]
async fn health_reports_connections_and_modules() {
    let identity = identity_server().await;
    let (addr, _state) = start(&identity.url(), "http://127.0.0.1:9", 20).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token=valid123"))
        .await
        .unwrap();
    next_json(&mut ws).await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["connections"], json!(1));
    assert_eq!(health["modules"], json!(1));
    assert_eq!(health["rate_limit"]["limit"], json!(20));
    assert_eq!(health["rate_limit"]["window_secs"], json!(60));
    // Seeded snapshot, never refreshed from the directory.
    assert!(health["modules_refreshed_secs_ago"].is_null());
}

#[tokio::test]
async fn disconnect_removes_the_client() {
    let identity = identity_server().await;
    let (addr, state) = start(&identity.url(), "http://127.0.0.1:9", 20).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token=valid123"))
        .await
        .unwrap();
    next_json(&mut ws).await;
    assert_eq!(state.client_count().await, 1);

    ws.close(None).await.unwrap();
    for _ in 0..100 {
        if state.client_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.client_count().await, 0);
}
