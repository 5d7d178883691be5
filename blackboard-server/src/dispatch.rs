//! Tool dispatch surface: named operations with typed arguments, success
//! envelopes, and a transport-agnostic entry point.
//!
//! Grounded on the teacher's `mcp::handlers::execute_tool` match-on-name
//! dispatch, generalized from its MCP/trajectory domain to the fourteen
//! operations of §6. Identity/permissions are injected as `auth: &AuthContext`
//! by the caller (the HTTP/WS layer resolves the protected token before
//! reaching this function) rather than appearing in any tool's input schema,
//! per §4.8's "context parameters must be server-bound" rule — the two
//! exceptions are `authenticate_agent` and `refresh_token`, whose own
//! arguments carry the credential being exchanged.

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::notify::NotificationEvent;
use crate::state::AppState;
use blackboard_core::{
    AccessTier, AgentId, AgentType, CoreError, MemoryScope, Permission, SearchScope, SessionId,
    Visibility,
};
use serde_json::{json, Value as JsonValue};

/// Declares a tool's public name, description and input schema. Optional
/// object-typed parameters are always declared as `{"type":"object",
/// "additionalProperties":true}` rather than a union-with-null shape, per
/// §4.8/§9's strict-client requirement.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: JsonValue,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    let object_schema = || json!({"type": "object", "additionalProperties": true});
    vec![
        ToolSpec {
            name: "authenticate_agent",
            description: "Exchange an API key for a protected token.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "agent_type": {"type": "string"},
                    "api_key": {"type": "string"},
                    "requested_permissions": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["agent_id", "agent_type", "api_key"]
            }),
        },
        ToolSpec {
            name: "refresh_token",
            description: "Rotate a protected token for its current holder.",
            input_schema: json!({
                "type": "object",
                "properties": {"current_token": {"type": "string"}},
                "required": ["current_token"]
            }),
        },
        ToolSpec {
            name: "create_session",
            description: "Create a new session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "purpose": {"type": "string"},
                    "metadata": object_schema()
                },
                "required": ["purpose"]
            }),
        },
        ToolSpec {
            name: "get_session",
            description: "Fetch a session and its visible message count.",
            input_schema: json!({
                "type": "object",
                "properties": {"session_id": {"type": "string"}},
                "required": ["session_id"]
            }),
        },
        ToolSpec {
            name: "add_message",
            description: "Append a message to a session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "content": {"type": "string"},
                    "visibility": {"type": "string"},
                    "message_type": {"type": "string"},
                    "metadata": object_schema(),
                    "parent_message_id": {"type": "integer"}
                },
                "required": ["session_id", "content"]
            }),
        },
        ToolSpec {
            name: "get_messages",
            description: "Fetch messages visible to the caller.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "limit": {"type": "integer"},
                    "offset": {"type": "integer"},
                    "visibility_filter": {"type": "string"}
                },
                "required": ["session_id"]
            }),
        },
        ToolSpec {
            name: "set_message_visibility",
            description: "Change a message's visibility tier.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message_id": {"type": "integer"},
                    "new_visibility": {"type": "string"},
                    "reason": {"type": "string"}
                },
                "required": ["message_id", "new_visibility"]
            }),
        },
        ToolSpec {
            name: "search_context",
            description: "Fuzzy substring-biased content search within a session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "query": {"type": "string"},
                    "threshold": {"type": "integer"},
                    "limit": {"type": "integer"},
                    "search_scope": {"type": "string"}
                },
                "required": ["session_id", "query"]
            }),
        },
        ToolSpec {
            name: "search_by_sender",
            description: "Exact-sender message lookup within a session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "sender": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["session_id", "sender"]
            }),
        },
        ToolSpec {
            name: "search_by_timerange",
            description: "Time-range message lookup within a session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "start": {"type": "string"},
                    "end": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["session_id", "start", "end"]
            }),
        },
        ToolSpec {
            name: "set_memory",
            description: "Set a per-agent key-value memory entry.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "string"},
                    "session_id": {"type": "string"},
                    "ttl_seconds": {"type": "integer"},
                    "overwrite": {"type": "boolean"},
                    "metadata": object_schema()
                },
                "required": ["key", "value"]
            }),
        },
        ToolSpec {
            name: "get_memory",
            description: "Fetch a per-agent key-value memory entry.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "session_id": {"type": "string"}
                },
                "required": ["key"]
            }),
        },
        ToolSpec {
            name: "list_memory",
            description: "List the caller's memory entries.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "scope": {"type": "string"},
                    "session_id": {"type": "string"},
                    "prefix": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": []
            }),
        },
        ToolSpec {
            name: "get_usage_guidance",
            description: "Fetch usage guidance, varying by access tier.",
            input_schema: json!({
                "type": "object",
                "properties": {"guidance_type": {"type": "string"}},
                "required": []
            }),
        },
        ToolSpec {
            name: "get_audit_log",
            description: "Fetch audit log entries (admin only).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "session_id": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": []
            }),
        },
        ToolSpec {
            name: "get_performance_metrics",
            description: "Fetch coarse server performance metrics (admin only).",
            input_schema: json!({"type": "object", "properties": {}, "required": []}),
        },
    ]
}

fn require_str<'a>(args: &'a JsonValue, field: &str) -> ApiResult<&'a str> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::invalid_input(format!("missing required field '{field}'")).into())
}

fn opt_str<'a>(args: &'a JsonValue, field: &str) -> Option<&'a str> {
    args.get(field).and_then(|v| v.as_str())
}

fn opt_i64(args: &JsonValue, field: &str) -> Option<i64> {
    args.get(field).and_then(|v| v.as_i64())
}

fn parse_session_id(s: &str) -> ApiResult<SessionId> {
    SessionId::parse(s).map_err(|e| CoreError::from(e).into())
}

fn parse_agent_id(s: &str) -> ApiResult<AgentId> {
    AgentId::parse(s).map_err(|e| CoreError::from(e).into())
}

fn parse_visibility(s: &str) -> ApiResult<Visibility> {
    s.parse()
        .map_err(|_| CoreError::invalid_input(format!("invalid visibility '{s}'")).into())
}

async fn audit(
    state: &AppState,
    event_type: &str,
    agent_id: Option<&AgentId>,
    session_id: Option<&SessionId>,
    resource: Option<&str>,
    action: Option<&str>,
    result: &str,
) {
    let _ = state
        .storage
        .append_audit(event_type, agent_id, session_id, resource, action, Some(result), None)
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn audit_with_metadata(
    state: &AppState,
    event_type: &str,
    agent_id: Option<&AgentId>,
    session_id: Option<&SessionId>,
    resource: Option<&str>,
    action: Option<&str>,
    result: &str,
    metadata: JsonValue,
) {
    let _ = state
        .storage
        .append_audit(event_type, agent_id, session_id, resource, action, Some(result), Some(metadata))
        .await;
}

fn require_tier(auth: &AuthContext, needed: AccessTier) -> ApiResult<()> {
    let ok = match needed {
        AccessTier::Anonymous => true,
        AccessTier::ReadOnly => auth.can_read(),
        AccessTier::Agent => auth.can_write(),
        AccessTier::Admin => auth.is_admin(),
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::permission_denied(format!("requires at least {needed} tier")).into())
    }
}

/// Dispatches one named tool call. `auth` is the identity/tier already
/// resolved by the caller for every tool except `authenticate_agent`, whose
/// own arguments carry the credential being exchanged (a freshly connecting
/// agent has no protected token yet, so it is invoked with an anonymous
/// `AuthContext`).
pub async fn dispatch(
    state: &AppState,
    auth: &AuthContext,
    name: &str,
    args: JsonValue,
) -> ApiResult<JsonValue> {
    match name {
        "authenticate_agent" => authenticate_agent(state, &args).await,
        "refresh_token" => refresh_token(state, &args).await,
        "create_session" => create_session(state, auth, &args).await,
        "get_session" => get_session(state, auth, &args).await,
        "add_message" => add_message(state, auth, &args).await,
        "get_messages" => get_messages(state, auth, &args).await,
        "set_message_visibility" => set_message_visibility(state, auth, &args).await,
        "search_context" => search_context(state, auth, &args).await,
        "search_by_sender" => search_by_sender(state, auth, &args).await,
        "search_by_timerange" => search_by_timerange(state, auth, &args).await,
        "set_memory" => set_memory(state, auth, &args).await,
        "get_memory" => get_memory(state, auth, &args).await,
        "list_memory" => list_memory(state, auth, &args).await,
        "get_usage_guidance" => Ok(get_usage_guidance(auth, &args)),
        "get_audit_log" => get_audit_log(state, auth, &args).await,
        "get_performance_metrics" => get_performance_metrics(state, auth).await,
        other => Err(CoreError::invalid_input(format!("unknown tool '{other}'")).into()),
    }
}

async fn authenticate_agent(state: &AppState, args: &JsonValue) -> ApiResult<JsonValue> {
    let api_key = require_str(args, "api_key")?;
    if api_key != state.config.api_key {
        audit(state, "authn", None, None, None, Some("authenticate_agent"), "denied").await;
        return Err(CoreError::auth_failed("invalid API key").into());
    }

    let agent_id = parse_agent_id(require_str(args, "agent_id")?)?;
    let agent_type = AgentType::new(require_str(args, "agent_type")?);
    let requested: Vec<Permission> = args
        .get("requested_permissions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_else(|| vec![Permission::Read]);

    let (token_id, granted, expires_at) =
        state.tokens.issue(agent_id.clone(), agent_type, &requested).await?;

    audit(
        state,
        "authn",
        Some(&agent_id),
        None,
        None,
        Some("authenticate_agent"),
        "success",
    )
    .await;

    Ok(json!({
        "success": true,
        "token": token_id.as_str(),
        "permissions": granted.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        "expires_at": expires_at.timestamp(),
    }))
}

async fn refresh_token(state: &AppState, args: &JsonValue) -> ApiResult<JsonValue> {
    let current_token = require_str(args, "current_token")?;
    let (token_id, _granted, expires_at) = state.tokens.refresh(current_token).await?;
    Ok(json!({
        "success": true,
        "token": token_id.as_str(),
        "expires_in": (expires_at.timestamp() - Utc::now().timestamp()).max(0),
    }))
}

async fn create_session(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Agent)?;
    let purpose = require_str(args, "purpose")?;
    let metadata = args.get("metadata").cloned();

    let session = state.storage.create_session(purpose, &auth.agent_id, metadata).await?;
    audit(
        state,
        "session_created",
        Some(&auth.agent_id),
        Some(&session.id),
        None,
        Some("create_session"),
        "success",
    )
    .await;

    Ok(json!({
        "success": true,
        "session_id": session.id.as_str(),
        "created_by": session.created_by.as_str(),
    }))
}

async fn get_session(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let session = state.storage.get_session(&session_id).await?;
    let count = state
        .storage
        .count_visible_messages(&session_id, &auth.reader())
        .await?;

    Ok(json!({
        "success": true,
        "session_id": session.id.as_str(),
        "purpose": session.purpose,
        "is_active": session.is_active,
        "created_by": session.created_by.as_str(),
        "created_at": session.created_at.timestamp(),
        "updated_at": session.updated_at.timestamp(),
        "message_count": count,
    }))
}

async fn add_message(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Agent)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let content = require_str(args, "content")?;
    let visibility = match opt_str(args, "visibility") {
        Some(v) => parse_visibility(v)?,
        None => Visibility::Public,
    };
    let message_type = opt_str(args, "message_type");
    let metadata = args.get("metadata").cloned();
    let parent_message_id = opt_i64(args, "parent_message_id").map(blackboard_core::MessageId::new);

    let _guard = state.locks.acquire(&session_id).await;
    let message = state
        .storage
        .add_message(
            &session_id,
            &auth.agent_id,
            &auth.agent_type,
            content,
            visibility,
            message_type,
            metadata.clone(),
            parent_message_id,
        )
        .await?;

    state.notify.publish(
        &session_id,
        NotificationEvent::message_added(
            &session_id,
            json!({"message_id": message.id.get(), "sender": message.sender.as_str()}),
        ),
    );
    drop(_guard);
    audit(
        state,
        "message_added",
        Some(&auth.agent_id),
        Some(&session_id),
        Some(&message.id.to_string()),
        Some("add_message"),
        "success",
    )
    .await;

    Ok(json!({
        "success": true,
        "message_id": message.id.get(),
        "timestamp": message.timestamp.timestamp(),
    }))
}

fn message_to_json(m: &blackboard_core::Message) -> JsonValue {
    json!({
        "id": m.id.get(),
        "session_id": m.session_id.as_str(),
        "sender": m.sender.as_str(),
        "sender_type": m.sender_type.as_str(),
        "content": m.content,
        "visibility": m.visibility.as_db_str(),
        "message_type": m.message_type,
        "metadata": m.metadata,
        "timestamp": m.timestamp.timestamp(),
        "parent_message_id": m.parent_message_id.map(|p| p.get()),
    })
}

async fn get_messages(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let limit = opt_i64(args, "limit");
    let offset = opt_i64(args, "offset");
    let visibility_filter = opt_str(args, "visibility_filter").map(parse_visibility).transpose()?;

    let messages = state
        .storage
        .get_messages(&session_id, &auth.reader(), limit, offset, visibility_filter)
        .await?;

    Ok(json!({
        "success": true,
        "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
    }))
}

async fn set_message_visibility(
    state: &AppState,
    auth: &AuthContext,
    args: &JsonValue,
) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Agent)?;
    let message_id = args
        .get("message_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| CoreError::invalid_input("missing required field 'message_id'"))?;
    let message_id = blackboard_core::MessageId::new(message_id);
    let new_visibility = parse_visibility(require_str(args, "new_visibility")?)?;
    let reason = opt_str(args, "reason");

    let existing = state.storage.get_message(message_id).await?;
    let is_owner = existing.sender == auth.agent_id;
    if !is_owner && !auth.is_admin() {
        audit(
            state,
            "visibility_denied",
            Some(&auth.agent_id),
            Some(&existing.session_id),
            Some(&message_id.to_string()),
            Some("set_message_visibility"),
            "denied",
        )
        .await;
        return Err(CoreError::permission_denied("only the sender or an ADMIN may change visibility").into());
    }
    if new_visibility == Visibility::AdminOnly && !auth.is_admin() {
        return Err(CoreError::permission_denied("admin_only visibility requires ADMIN").into());
    }

    let _guard = state.locks.acquire(&existing.session_id).await;
    let (updated, old_visibility) = state.storage.set_message_visibility(message_id, new_visibility).await?;

    state.notify.publish(
        &updated.session_id,
        NotificationEvent::message_visibility_changed(
            &updated.session_id,
            json!({
                "message_id": message_id.get(),
                "old_visibility": old_visibility.as_db_str(),
                "new_visibility": new_visibility.as_db_str(),
            }),
        ),
    );
    drop(_guard);
    audit_with_metadata(
        state,
        "visibility_changed",
        Some(&auth.agent_id),
        Some(&updated.session_id),
        Some(&message_id.to_string()),
        Some("set_message_visibility"),
        "success",
        json!({
            "old_visibility": old_visibility.as_db_str(),
            "new_visibility": new_visibility.as_db_str(),
            "reason": reason,
        }),
    )
    .await;

    Ok(json!({
        "success": true,
        "message_id": message_id.get(),
        "old_visibility": old_visibility.as_db_str(),
        "new_visibility": new_visibility.as_db_str(),
    }))
}

async fn search_context(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let query = require_str(args, "query")?;
    let threshold = opt_i64(args, "threshold").unwrap_or(60).clamp(0, 100) as u32;
    let limit = opt_i64(args, "limit").unwrap_or(10);
    let search_scope = match opt_str(args, "search_scope") {
        Some(s) => s
            .parse()
            .map_err(|_| CoreError::invalid_input(format!("invalid search_scope '{s}'")))?,
        None => SearchScope::Content,
    };

    let hits = state
        .storage
        .search_context(&session_id, &auth.reader(), query, threshold, limit, search_scope)
        .await?;

    Ok(json!({
        "success": true,
        "results": hits.iter().map(|h| {
            let mut v = message_to_json(&h.message);
            v["score"] = json!(h.score);
            v
        }).collect::<Vec<_>>(),
    }))
}

async fn search_by_sender(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let sender = parse_agent_id(require_str(args, "sender")?)?;
    let limit = opt_i64(args, "limit").unwrap_or(50);

    let results = state
        .storage
        .search_by_sender(&session_id, &auth.reader(), &sender, limit)
        .await?;

    Ok(json!({
        "success": true,
        "results": results.iter().map(message_to_json).collect::<Vec<_>>(),
    }))
}

async fn search_by_timerange(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let session_id = parse_session_id(require_str(args, "session_id")?)?;
    let start = parse_rfc3339(require_str(args, "start")?)?;
    let end = parse_rfc3339(require_str(args, "end")?)?;
    let limit = opt_i64(args, "limit").unwrap_or(50);

    let results = state
        .storage
        .search_by_timerange(&session_id, &auth.reader(), start, end, limit)
        .await?;

    Ok(json!({
        "success": true,
        "results": results.iter().map(message_to_json).collect::<Vec<_>>(),
    }))
}

fn parse_rfc3339(s: &str) -> ApiResult<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::invalid_input(format!("invalid timestamp '{s}': {e}")).into())
}

async fn set_memory(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Agent)?;
    let key = require_str(args, "key")?;
    let value = require_str(args, "value")?;
    let session_id = opt_str(args, "session_id").map(parse_session_id).transpose()?;
    let ttl_seconds = opt_i64(args, "ttl_seconds");
    let overwrite = args.get("overwrite").and_then(|v| v.as_bool()).unwrap_or(true);
    let metadata = args.get("metadata").cloned();

    let expires_at = state
        .storage
        .set_memory(&auth.agent_id, key, value, session_id.as_ref(), ttl_seconds, overwrite, metadata, Utc::now())
        .await?;

    if let Some(session_id) = &session_id {
        state.notify.publish(
            session_id,
            NotificationEvent::memory_updated(session_id, json!({"agent_id": auth.agent_id.as_str(), "key": key})),
        );
    }

    Ok(json!({
        "success": true,
        "stored": true,
        "expires_at": expires_at.map(|e| e.timestamp()),
    }))
}

async fn get_memory(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let key = require_str(args, "key")?;
    let session_id = opt_str(args, "session_id").map(parse_session_id).transpose()?;

    let entry = state
        .storage
        .get_memory(&auth.agent_id, key, session_id.as_ref(), Utc::now())
        .await?;

    Ok(json!({
        "success": true,
        "value": entry.value,
        "metadata": entry.metadata,
        "expires_at": entry.expires_at.map(|e| e.timestamp()),
    }))
}

async fn list_memory(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::ReadOnly)?;
    let scope = match opt_str(args, "scope") {
        Some(s) => s
            .parse()
            .map_err(|_| CoreError::invalid_input(format!("invalid scope '{s}'")))?,
        None => MemoryScope::All,
    };
    let session_id = opt_str(args, "session_id").map(parse_session_id).transpose()?;
    let prefix = opt_str(args, "prefix");
    let limit = opt_i64(args, "limit");

    let entries = state
        .storage
        .list_memory(&auth.agent_id, session_id.as_ref(), scope, prefix, limit, Utc::now())
        .await?;

    Ok(json!({
        "success": true,
        "entries": entries.iter().map(|e| json!({
            "key": e.key,
            "value": e.value,
            "session_id": e.session_id.as_ref().map(|s| s.as_str()),
            "metadata": e.metadata,
            "updated_at": e.updated_at.timestamp(),
            "expires_at": e.expires_at.map(|x| x.timestamp()),
        })).collect::<Vec<_>>(),
    }))
}

fn get_usage_guidance(auth: &AuthContext, args: &JsonValue) -> JsonValue {
    let guidance_type = opt_str(args, "guidance_type").unwrap_or("general");
    let tips: Vec<&str> = match auth.tier {
        AccessTier::Admin => vec![
            "You may read admin_only messages and the audit log.",
            "Use set_message_visibility to correct misclassified messages.",
        ],
        AccessTier::Agent => vec![
            "Use add_message with visibility=private for scratch notes only you should see.",
            "set_memory with a session_id scopes an entry to that session; omit it for global memory.",
        ],
        AccessTier::ReadOnly => vec!["You may read and search sessions but not write to them."],
        AccessTier::Anonymous => vec!["Call authenticate_agent to obtain a protected token."],
    };
    json!({
        "success": true,
        "guidance_type": guidance_type,
        "tier": auth.tier.to_string(),
        "tips": tips,
    })
}

async fn get_audit_log(state: &AppState, auth: &AuthContext, args: &JsonValue) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Admin)?;
    let agent_id = opt_str(args, "agent_id").map(parse_agent_id).transpose()?;
    let session_id = opt_str(args, "session_id").map(parse_session_id).transpose()?;
    let limit = opt_i64(args, "limit").unwrap_or(100);

    let entries = state
        .storage
        .query_audit(agent_id.as_ref(), session_id.as_ref(), limit)
        .await?;

    Ok(json!({
        "success": true,
        "entries": entries.iter().map(|e| json!({
            "id": e.id.get(),
            "timestamp": e.timestamp.timestamp(),
            "event_type": e.event_type,
            "agent_id": e.agent_id.as_ref().map(|a| a.as_str()),
            "session_id": e.session_id.as_ref().map(|s| s.as_str()),
            "resource": e.resource,
            "action": e.action,
            "result": e.result,
            "metadata": e.metadata,
        })).collect::<Vec<_>>(),
    }))
}

async fn get_performance_metrics(state: &AppState, auth: &AuthContext) -> ApiResult<JsonValue> {
    require_tier(auth, AccessTier::Admin)?;
    let recent_audit_events = state.storage.query_audit(None, None, 1).await?.len();
    Ok(json!({
        "success": true,
        "pool_min_connections": state.config.pool.min_connections,
        "pool_max_connections": state.config.pool.max_connections,
        "recent_audit_events_sampled": recent_audit_events,
    }))
}

use chrono::Utc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use crate::tokens::TokenManager;
    use blackboard_storage::{PoolConfig, SessionLockRegistry, Storage};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let storage = Arc::new(
            Storage::connect(&PoolConfig {
                database_url: "sqlite::memory:".into(),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let tokens = Arc::new(TokenManager::new(
            storage.clone(),
            b"test-signing-key".to_vec(),
            [3u8; 32],
            Arc::new(SystemClock),
            3600,
        ));
        let config = Arc::new(Config {
            api_key: "test-api-key".to_string(),
            signing_key: secrecy::SecretBox::new(b"test-signing-key".to_vec().into()),
            encryption_key: [3u8; 32],
            pool: PoolConfig::default(),
            http_port: 8080,
            ws_port: 8081,
            cors_origins: vec![],
            rate_limit_enabled: false,
            rate_limit_per_minute: 600,
            rate_limit_window: std::time::Duration::from_secs(60),
            broadcast_bridge_timeout: std::time::Duration::from_secs(2),
        });
        AppState {
            storage,
            locks: Arc::new(SessionLockRegistry::default()),
            notify: Arc::new(crate::notify::NotificationBus::new()),
            tokens,
            rate_limit: crate::rate_limit::RateLimitState::new(config.clone()),
            config,
        }
    }

    fn auth_for(agent_id: &str, agent_type: &str, tier: AccessTier) -> AuthContext {
        AuthContext {
            agent_id: AgentId::parse(agent_id).unwrap(),
            agent_type: AgentType::new(agent_type),
            tier,
        }
    }

    #[tokio::test]
    async fn authenticate_agent_rejects_wrong_api_key() {
        let state = test_state().await;
        let err = authenticate_agent(
            &state,
            &json!({"agent_id": "agent-a", "agent_type": "claude", "api_key": "wrong"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, blackboard_core::ErrorKind::AuthFailed);
    }

    #[tokio::test]
    async fn authenticate_agent_issues_token() {
        let state = test_state().await;
        let result = authenticate_agent(
            &state,
            &json!({"agent_id": "agent-a", "agent_type": "claude", "api_key": "test-api-key"}),
        )
        .await
        .unwrap();
        assert_eq!(result["success"], json!(true));
        assert!(result["token"].as_str().unwrap().starts_with("sct_"));
    }

    #[tokio::test]
    async fn full_visibility_isolation_scenario_through_dispatch() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);

        let session = create_session(&state, &a, &json!({"purpose": "isolation test"}))
            .await
            .unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();

        for visibility in ["public", "private", "agent_only", "admin_only"] {
            add_message(
                &state,
                &a,
                &json!({"session_id": session_id, "content": format!("msg-{visibility}"), "visibility": visibility}),
            )
            .await
            .unwrap();
        }

        let b = auth_for("agent-b", "gemini", AccessTier::Agent);
        let b_messages = get_messages(&state, &b, &json!({"session_id": session_id})).await.unwrap();
        assert_eq!(b_messages["messages"].as_array().unwrap().len(), 1);

        let c = auth_for("agent-c", "claude", AccessTier::Agent);
        let c_messages = get_messages(&state, &c, &json!({"session_id": session_id})).await.unwrap();
        assert_eq!(c_messages["messages"].as_array().unwrap().len(), 2);

        let admin = auth_for("admin1", "claude", AccessTier::Admin);
        let admin_messages = get_messages(&state, &admin, &json!({"session_id": session_id})).await.unwrap();
        assert_eq!(admin_messages["messages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn non_admin_cannot_set_admin_only_visibility() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);
        let session = create_session(&state, &a, &json!({"purpose": "p"})).await.unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();
        let added = add_message(&state, &a, &json!({"session_id": session_id, "content": "hi"})).await.unwrap();

        let err = set_message_visibility(
            &state,
            &a,
            &json!({"message_id": added["message_id"], "new_visibility": "admin_only"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, blackboard_core::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn add_message_honors_message_type_and_visibility_change_records_reason() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);
        let session = create_session(&state, &a, &json!({"purpose": "p"})).await.unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();

        let added = add_message(
            &state,
            &a,
            &json!({"session_id": session_id, "content": "hi", "message_type": "tool_call"}),
        )
        .await
        .unwrap();
        let messages = get_messages(&state, &a, &json!({"session_id": session_id})).await.unwrap();
        assert_eq!(messages["messages"][0]["message_type"], json!("tool_call"));

        set_message_visibility(
            &state,
            &a,
            &json!({"message_id": added["message_id"], "new_visibility": "private", "reason": "scratch note"}),
        )
        .await
        .unwrap();

        let admin = auth_for("admin1", "claude", AccessTier::Admin);
        let log = get_audit_log(&state, &admin, &json!({})).await.unwrap();
        let entry = log["entries"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["event_type"] == json!("visibility_changed"))
            .unwrap();
        assert_eq!(entry["result"], json!("success"));
        assert_eq!(entry["metadata"]["reason"], json!("scratch note"));
    }

    #[tokio::test]
    async fn read_only_tier_cannot_add_message() {
        let state = test_state().await;
        let admin = auth_for("admin1", "claude", AccessTier::Admin);
        let session = create_session(&state, &admin, &json!({"purpose": "p"})).await.unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();

        let reader = auth_for("reader1", "claude", AccessTier::ReadOnly);
        let err = add_message(&state, &reader, &json!({"session_id": session_id, "content": "hi"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, blackboard_core::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn memory_round_trips_through_dispatch() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);
        set_memory(&state, &a, &json!({"key": "k1", "value": "v1"})).await.unwrap();
        let got = get_memory(&state, &a, &json!({"key": "k1"})).await.unwrap();
        assert_eq!(got["value"], json!("v1"));
    }

    #[tokio::test]
    async fn set_memory_overwrite_false_rejects_existing_key() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);
        set_memory(&state, &a, &json!({"key": "k1", "value": "v1"})).await.unwrap();
        let err = set_memory(&state, &a, &json!({"key": "k1", "value": "v2", "overwrite": false}))
            .await
            .unwrap_err();
        assert_eq!(err.code, blackboard_core::ErrorKind::Conflict);
        let got = get_memory(&state, &a, &json!({"key": "k1"})).await.unwrap();
        assert_eq!(got["value"], json!("v1"));
    }

    #[tokio::test]
    async fn audit_log_requires_admin() {
        let state = test_state().await;
        let a = auth_for("agent-a", "claude", AccessTier::Agent);
        let err = get_audit_log(&state, &a, &json!({})).await.unwrap_err();
        assert_eq!(err.code, blackboard_core::ErrorKind::PermissionDenied);

        let admin = auth_for("admin1", "claude", AccessTier::Admin);
        let ok = get_audit_log(&state, &admin, &json!({})).await;
        assert!(ok.is_ok());
    }
}
