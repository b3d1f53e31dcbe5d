/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chirp_core::actions::{Actions, TweetDraft};
use chirp_core::cache::{Cache, MemoryCache, RedisCache};
use chirp_core::dispatch::Dispatcher;
use chirp_core::error::CoreError;
use chirp_core::inbox::NotificationInbox;
use chirp_core::queue::{NotificationQueue, QueueSettings};
use chirp_core::registry::ConnectionRegistry;
use chirp_core::sessions::{CallerResolver, TokenBlacklist, UidTokenResolver};
use chirp_core::store::{EntityStore, SqliteStore, UserRecord};
use chirp_core::timeline::{TimelineAssembler, TimelineSettings};
use chirp_protocol::{ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct ServerConfig {
    bind: SocketAddr,
    db_path: String,
    redis_url: Option<String>,
    redis_prefix: String,
    timeline: TimelineSettings,
    queue: QueueSettings,
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn EntityStore>,
    assembler: Arc<TimelineAssembler>,
    actions: Arc<Actions>,
    queue: NotificationQueue,
    registry: Arc<ConnectionRegistry>,
    inbox: Arc<NotificationInbox>,
    blacklist: Arc<TokenBlacklist>,
    resolver: Arc<dyn CallerResolver>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let cfg = load_config();
    let store: Arc<dyn EntityStore> = Arc::new(
        SqliteStore::open(&cfg.db_path).with_context(|| format!("open db: {}", cfg.db_path))?,
    );
    let cache: Arc<dyn Cache> = match &cfg.redis_url {
        Some(url) => Arc::new(
            RedisCache::connect(url, cfg.redis_prefix.clone())
                .await
                .context("redis init")?,
        ),
        None => {
            warn!("CHIRP_REDIS_URL not set, falling back to in-process cache");
            Arc::new(MemoryCache::new(10_000))
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let inbox = Arc::new(NotificationInbox::new(cache.clone()));
    let blacklist = Arc::new(TokenBlacklist::new(cache.clone()));
    let resolver: Arc<dyn CallerResolver> =
        Arc::new(UidTokenResolver::new(store.clone(), blacklist.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), inbox.clone()));
    let queue = NotificationQueue::start(cfg.queue, dispatcher, shutdown_rx);

    let assembler = Arc::new(TimelineAssembler::new(
        store.clone(),
        cache.clone(),
        cfg.timeline,
    ));
    let actions = Arc::new(Actions::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        registry.clone(),
    ));

    let state = AppState {
        store,
        assembler,
        actions,
        queue,
        registry,
        inbox,
        blacklist,
        resolver,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .route("/api/users", post(create_user))
        .route("/api/users/:id/follow", post(follow_user))
        .route("/api/timeline", get(get_timeline))
        .route("/api/tweets", post(create_tweet))
        .route("/api/tweets/:id", get(get_tweet).delete(delete_tweet))
        .route("/api/tweets/:id/like", post(like_tweet))
        .route("/api/tweets/:id/retweet", post(retweet))
        .route("/api/tweets/:id/comments", post(comment))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/:id", delete(remove_notification))
        .route("/api/logout", post(logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = cfg.bind;
    info!("chirp_server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server")?;
    Ok(())
}

fn load_config() -> ServerConfig {
    let bind = std::env::var("CHIRP_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
    let bind: SocketAddr = bind.parse().expect("CHIRP_BIND invalid");
    let db_path = std::env::var("CHIRP_DB").unwrap_or_else(|_| "chirp.db".to_string());
    let redis_url = std::env::var("CHIRP_REDIS_URL").ok().filter(|v| !v.is_empty());
    let redis_prefix =
        std::env::var("CHIRP_REDIS_PREFIX").unwrap_or_else(|_| "chirp".to_string());

    let mut timeline = TimelineSettings::default();
    if let Some(v) = env_u64("CHIRP_TIMELINE_TTL_SECS") {
        timeline.cache_ttl_secs = v;
    }
    if let Some(v) = env_u64("CHIRP_TIMELINE_SOURCE_LIMIT") {
        timeline.source_limit = v.clamp(1, 500) as u32;
    }
    if let Some(v) = env_u64("CHIRP_TRENDING_HASHTAGS") {
        timeline.trending_hashtags = v.clamp(1, 100) as u32;
    }

    let mut queue = QueueSettings::default();
    if let Some(v) = env_u64("CHIRP_QUEUE_CAPACITY") {
        queue.capacity = v.clamp(16, 1_000_000) as usize;
    }
    if let Some(v) = env_u64("CHIRP_QUEUE_WORKERS") {
        queue.workers = v.clamp(1, 64) as usize;
    }
    if let Some(v) = env_u64("CHIRP_QUEUE_MAX_ATTEMPTS") {
        queue.max_attempts = v.clamp(1, 20) as u32;
    }
    if let Some(v) = env_u64("CHIRP_QUEUE_RETRY_DELAY_MS") {
        queue.retry_delay_ms = v;
    }

    ServerConfig {
        bind,
        db_path,
        redis_url,
        redis_prefix,
        timeline,
        queue,
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn error_response(e: CoreError) -> Response {
    let status = match &e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Rejected(_) => StatusCode::BAD_REQUEST,
        CoreError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
    };
    if status == StatusCode::SERVICE_UNAVAILABLE {
        error!("request failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

async fn auth_caller(state: &AppState, headers: &HeaderMap) -> Result<UserRecord, Response> {
    let Some(token) = bearer_token(headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing bearer token" })),
        )
            .into_response());
    };
    let user_id = match state.resolver.resolve(&token).await {
        Ok(id) => id,
        Err(CoreError::Rejected(reason)) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": reason })),
            )
                .into_response())
        }
        Err(e) => return Err(error_response(e)),
    };
    match state.store.get_user(&user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(error_response(CoreError::NotFound("user"))),
        Err(e) => Err(error_response(e)),
    }
}

#[derive(Deserialize)]
struct CreateUserReq {
    username: String,
    handle: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserReq>,
) -> Response {
    match state.actions.create_user(&req.username, &req.handle).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateTweetReq {
    content: String,
    #[serde(default)]
    media_ref: Option<String>,
    #[serde(default)]
    hashtags: Vec<String>,
}

async fn create_tweet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTweetReq>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let draft = TweetDraft {
        content: req.content,
        media_ref: req.media_ref,
        hashtags: req.hashtags,
    };
    match state.actions.create_tweet(&caller.id, draft).await {
        Ok(tweet) => (StatusCode::CREATED, Json(tweet)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_tweet(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.actions.get_tweet(&id).await {
        Ok(tweet) => Json(tweet).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_tweet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.actions.delete_tweet(&caller.id, &id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn like_tweet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.actions.toggle_like(&caller, &id).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "liked": outcome.liked,
            "likes": outcome.like_count,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn retweet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.actions.toggle_retweet(&caller, &id).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "retweeted": outcome.retweeted,
            "retweets": outcome.retweet_count,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CommentReq {
    content: String,
}

async fn comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CommentReq>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.actions.add_comment(&caller, &id, &req.content).await {
        Ok(comment) => (StatusCode::CREATED, Json(comment)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn follow_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.actions.toggle_follow(&caller, &id).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "following": outcome.following,
            "followers_count": outcome.follower_count,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_timeline(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.assembler.assemble(&caller.id).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_notifications(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.inbox.list(&caller.id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match auth_caller(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.inbox.remove(&caller.id, &id).await {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => error_response(CoreError::NotFound("notification")),
        Err(e) => error_response(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return Json(json!({ "success": false, "message": "no token provided" }))
            .into_response();
    };
    match state.blacklist.revoke(&token).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    let stats = state.queue.stats();
    let online = state.registry.online_count().await;
    Json(json!({
        "status": "ok",
        "online": online,
        "queue": stats,
    }))
    .into_response()
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The connection is inert until the client binds a user id.
    let user_id = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Register { user_id }) if !user_id.trim().is_empty() => {
                    break user_id.trim().to_string();
                }
                Ok(_) | Err(_) => {
                    warn!("ignoring frame before registration");
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("socket error before registration: {e}");
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::channel::<ServerFrame>(64);
    let handle = state.registry.register(&user_id, tx).await;
    info!(user = %user_id, "socket registered");

    let cancel = CancellationToken::new();

    let cancel_writer = cancel.clone();
    let writer_user = user_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                frame = rx.recv() => frame,
                _ = cancel_writer.cancelled() => None,
            };
            let Some(frame) = frame else { break };
            let json = match serde_json::to_string(&frame) {
                Ok(v) => v,
                Err(e) => {
                    error!(user = %writer_user, "serialize frame failed: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let cancel_reader = cancel.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
        cancel_reader.cancel();
    });

    let _ = tokio::join!(writer, reader);

    // Unregister must finish before the close does: a dispatch racing this
    // teardown either sees the mapping gone or a sender already closed.
    state.registry.unregister(&handle).await;
    info!(user = %user_id, "socket disconnected");
}
