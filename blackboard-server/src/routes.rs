//! HTTP/WS transport for the tool dispatch surface (§6).
//!
//! Grounded on the teacher's `routes/mcp/mod.rs` router shape (`/list` +
//! `/call` pair) and `ws.rs`'s upgrade-then-forward loop, adapted to this
//! spec's session-keyed (not tenant-keyed) notification bus. The MCP wire
//! framing itself is explicitly out of scope (§1); any bidirectional
//! transport may host `dispatch`, so this module exposes it over plain HTTP
//! + WS rather than MCP stdio/SSE.

use crate::auth::AuthContext;
use crate::dispatch::{self, tool_specs};
use crate::error::{ApiError, ApiResult};
use crate::notify::NotificationEvent;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{FromRequestParts, Path, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, middleware, Json, Router};
use blackboard_core::{AccessTier, AgentType, CoreError, SessionId};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the full service: tool dispatch + real-time routes, wrapped in the
/// CORS policy and rate limiter driven by [`crate::config::Config`], plus
/// request tracing (grounded on the teacher's `tower_http` usage) and a
/// hard timeout on the internal broadcast bridge.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let broadcast_route = Router::new().route("/broadcast/{session_id}", post(broadcast_bridge)).layer(
        ServiceBuilder::new()
            .layer(axum::error_handling::HandleErrorLayer::new(broadcast_bridge_timed_out))
            .layer(tower::timeout::TimeoutLayer::new(state.config.broadcast_bridge_timeout)),
    );

    Router::new()
        .route("/health", get(health))
        .route("/tools/list", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/ws/{session_id}", get(ws_upgrade))
        .merge(broadcast_route)
        .layer(middleware::from_fn_with_state(state.rate_limit.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `cors_origins` empty means "no cross-origin deployment configured" — the
/// teacher's `adk-studio` restricts by predicate rather than `Any` for the
/// same reason (an open `Allow-Origin: *` alongside bearer tokens would
/// defeat the point of the auth layer). An explicit `*` entry still opts
/// into wide-open CORS for local/dev use.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    let healthy = state.storage.health().await.is_ok();
    Json(json!({"success": healthy}))
}

async fn list_tools() -> Json<JsonValue> {
    let specs: Vec<JsonValue> = tool_specs()
        .into_iter()
        .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
        .collect();
    Json(json!({"success": true, "tools": specs}))
}

#[derive(Deserialize)]
struct CallToolRequest {
    name: String,
    #[serde(default)]
    arguments: JsonValue,
}

async fn call_tool(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CallToolRequest>,
) -> Response {
    match dispatch::dispatch(&state, &auth, &req.name, req.arguments).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Extracts an [`AuthContext`] from the `Authorization: Bearer <protected
/// token>` header. Missing header degrades to the `ANONYMOUS` tier rather
/// than rejecting the request outright — unauthenticated discovery
/// operations (`authenticate_agent`, `get_usage_guidance`) must still reach
/// the dispatcher, which enforces the tier requirement per tool (§4.3).
#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Ok(anonymous());
        };
        let header = header
            .to_str()
            .map_err(|_| ApiError::from(CoreError::invalid_token("malformed authorization header")))?;
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Ok(anonymous());
        };

        let claims = state.tokens.resolve(token).await?;
        Ok(AuthContext::from_claims(claims))
    }
}

fn anonymous() -> AuthContext {
    AuthContext {
        agent_id: blackboard_core::AgentId::parse("anonymous").expect("static id is valid"),
        agent_type: AgentType::new("anonymous"),
        tier: AccessTier::Anonymous,
    }
}

/// Real-time channel (§4.7, §6): a client connects over WS and supplies a
/// protected token, either via `Authorization` header or the `?token=`
/// query parameter (browsers cannot set arbitrary headers on a WS upgrade
/// request). Streams `message_added` / `message_visibility_changed` /
/// `memory_updated` events for the path session id, plus periodic
/// heartbeats, until the client disconnects.
#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<WsQuery>,
    headers: axum::http::HeaderMap,
) -> ApiResult<Response> {
    let session_id = SessionId::parse(session_id).map_err(CoreError::from)?;

    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let token = header_token
        .or(query.token)
        .ok_or_else(|| CoreError::auth_failed("missing token"))?;
    let claims = state.tokens.resolve(&token).await?;
    let auth = AuthContext::from_claims(claims);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, auth)))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: SessionId, auth: AuthContext) {
    tracing::info!(session_id = %session_id, agent_id = %auth.agent_id, "ws connected");
    let (mut sender, mut receiver) = futures_util::StreamExt::split(socket);
    let mut rx = state.notify.subscribe(&session_id);

    let mut recv_task = tokio::spawn(async move {
        use futures_util::StreamExt;
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %session_id, skipped, "ws subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                use futures_util::SinkExt;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = &mut recv_task => break,
        }
    }
    tracing::info!(session_id = %session_id, "ws disconnected");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &NotificationEvent,
) -> Result<(), axum::Error> {
    use futures_util::SinkExt;
    let text = serde_json::to_string(event).expect("NotificationEvent always serializes");
    sender.send(Message::Text(text)).await
}

/// Internal HTTP bridge (§4.7/§6) for deployments hosting the tool
/// dispatch and the live channel in separate processes: re-publishes a
/// post-commit event onto this process's notification bus. Not
/// authenticated beyond network placement, matching the spec's framing of
/// it as a co-hosted-component-only surface.
#[derive(Deserialize)]
struct BroadcastRequest {
    #[serde(rename = "type")]
    event_type: String,
    data: JsonValue,
}

async fn broadcast_bridge_timed_out(_err: axum::BoxError) -> Response {
    let err = ApiError::from(CoreError::internal("broadcast bridge timed out"));
    (axum::http::StatusCode::GATEWAY_TIMEOUT, Json(err)).into_response()
}

async fn broadcast_bridge(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<BroadcastRequest>,
) -> Response {
    let Ok(session_id) = SessionId::parse(&session_id) else {
        return Json(json!({"success": false})).into_response();
    };
    let event = match req.event_type.as_str() {
        "message_added" => NotificationEvent::message_added(&session_id, req.data),
        "message_visibility_changed" => {
            NotificationEvent::message_visibility_changed(&session_id, req.data)
        }
        "memory_updated" => NotificationEvent::memory_updated(&session_id, req.data),
        other => {
            tracing::debug!(event_type = other, "broadcast bridge: unknown event type");
            return Json(json!({"success": false})).into_response();
        }
    };
    state.notify.publish(&session_id, event);
    Json(json!({"success": true})).into_response()
}
