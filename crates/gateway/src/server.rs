use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use {
    gatehouse_config::{CounterBackend, GatehouseConfig},
    gatehouse_protocol::ConnectParams,
};

use crate::{
    identity::IdentityClient,
    registry::{ModuleRegistry, spawn_refresh_loop},
    state::GatewayState,
    throttle::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore},
    upstream::ModuleClient,
    ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Wire clients, registry and limiter from a validated config.
pub async fn build_state(config: &GatehouseConfig) -> anyhow::Result<Arc<GatewayState>> {
    let identity = Arc::new(IdentityClient::from_config(&config.identity, &config.http)?);
    let upstream = ModuleClient::new(
        Duration::from_secs(config.upstream.timeout_secs),
        &config.http.user_agent,
    )?;

    let rl = &config.rate_limit;
    let store: Arc<dyn CounterStore> = match rl.backend {
        CounterBackend::Redis => {
            let url = rl
                .redis_url
                .as_deref()
                .context("rate_limit.redis_url is required for the redis backend")?;
            Arc::new(
                RedisCounterStore::connect(url)
                    .await
                    .with_context(|| format!("failed to connect to redis at {url}"))?,
            )
        },
        CounterBackend::Memory => Arc::new(MemoryCounterStore::new()),
    };
    let limiter = RateLimiter::new(store, rl.limit, Duration::from_secs(rl.window_secs));

    Ok(GatewayState::new(
        identity,
        Arc::new(ModuleRegistry::new()),
        limiter,
        upstream,
        rl.reject,
    ))
}

/// Start the gateway HTTP + WebSocket server and run until interrupted.
pub async fn start_gateway(config: GatehouseConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;

    let refresh_every = Duration::from_secs(config.registry.refresh_interval_secs);
    let refresh = spawn_refresh_loop(
        Arc::clone(&state.registry),
        Arc::clone(&state.identity),
        refresh_every,
    );

    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("gatehouse gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("identity: {}", state.identity.base_url()),
        format!(
            "rate limit: {} per {}s ({:?}, {:?})",
            config.rate_limit.limit,
            config.rate_limit.window_secs,
            config.rate_limit.backend,
            config.rate_limit.reject
        ),
        format!("module refresh every {}s", refresh_every.as_secs()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    refresh.abort();
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.gateway.client_count().await;
    let modules = state.gateway.registry.snapshot().await.len();
    let refreshed = state.gateway.registry.refreshed_at().await;
    let limiter = &state.gateway.limiter;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "connections": count,
        "modules": modules,
        "modules_refreshed_secs_ago": refreshed.map(|t| t.elapsed().as_secs()),
        "rate_limit": {
            "limit": limiter.limit(),
            "window_secs": limiter.window().as_secs(),
        },
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, params, addr))
}
