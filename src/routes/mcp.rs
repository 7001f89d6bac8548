//! HTTP/JSON-RPC transport (C8): `/health`, and `POST`/`GET`/`DELETE /mcp`.
//!
//! Grounded in the teacher's Rocket bootstrap idiom (`lib.rs`'s figment
//! config + managed state) and `routes/stream.rs`'s `EventStream!` +
//! heartbeat + broadcast-select shape, repurposed from per-room chat
//! fan-out to per-agent MCP notification push.

use crate::dispatch::{is_eligible, preview_notification};
use crate::events::BusEvent;
use crate::protocol::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter, RateLimitedError};
use crate::session::{SessionEntry, SessionGuard, SessionManager};
use crate::tools;
use rocket::http::{Header, Status};
use rocket::response::stream::{Event, EventStream};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{delete, get, post, Request, State};

use super::{AuthenticatedAgent, BodySizeChecked};
use crate::db::Db;

#[get("/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// A response from the `/mcp` endpoint: always framed as a single JSON
/// body (§6 allows either JSON or an event-stream per response; the
/// dedicated `GET /mcp` channel is this bridge's streaming surface, so
/// `POST` always answers in `application/json`).
pub enum McpResponse {
    Reply {
        session_id: Option<String>,
        body: JsonRpcResponse,
    },
    Accepted,
    SessionNotFound,
    BadRequest(String),
    Closed,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for McpResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        match self {
            McpResponse::Reply { session_id, body } => {
                let json = Json(body);
                let mut response = Response::build_from(json.respond_to(req)?);
                if let Some(sid) = session_id {
                    response.header(Header::new("mcp-session-id", sid));
                }
                response.ok()
            }
            McpResponse::Accepted => Response::build().status(Status::Accepted).ok(),
            // The only error clients treat specially (§6, §7.5): the body
            // substring "Session not found" (case-insensitive) triggers a
            // transparent re-handshake.
            McpResponse::SessionNotFound => {
                let body = "Session not found";
                Response::build_from(body.respond_to(req)?)
                    .status(Status::NotFound)
                    .ok()
            }
            McpResponse::BadRequest(message) => Response::build_from(message.respond_to(req)?)
                .status(Status::BadRequest)
                .ok(),
            McpResponse::Closed => Response::build().status(Status::Ok).ok(),
        }
    }
}

fn session_header(req: &Request<'_>) -> Option<String> {
    req.headers().get_one("mcp-session-id").map(|s| s.to_string())
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        server_info: ServerInfo {
            name: "agorai-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: ServerCapabilities {
            tools: ToolsCapability { list_changed: false },
        },
    }
}

fn handle_request(db: &Db, caller: &SessionEntry, incoming: IncomingMessage) -> JsonRpcResponse {
    let id = incoming.id.clone().unwrap_or(RequestId::Null);
    match incoming.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            serde_json::to_value(initialize_result()).unwrap_or(serde_json::Value::Null),
        ),
        "tools/list" => {
            let result = ListToolsResult {
                tools: tools::tool_definitions(),
            };
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }
        "tools/call" => {
            let params: CallToolParams = match serde_json::from_value(incoming.params) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::from_mcp_error(
                        id,
                        &crate::error::McpError::InvalidParams {
                            message: e.to_string(),
                        },
                    )
                }
            };
            match tools::dispatch(&params.name, params.arguments, db, caller) {
                Ok(value) => {
                    let result = CallToolResult::text(&value);
                    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
                }
                Err(err) => JsonRpcResponse::from_mcp_error(id, &err),
            }
        }
        other => JsonRpcResponse::from_mcp_error(
            id,
            &crate::error::McpError::MethodNotFound {
                method: other.to_string(),
            },
        ),
    }
}

#[post("/mcp", data = "<body>")]
pub fn mcp_post(
    req: &Request<'_>,
    _size_ok: BodySizeChecked,
    auth: AuthenticatedAgent,
    db: &State<Db>,
    sessions: &State<SessionManager>,
    limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<serde_json::Value>,
) -> Result<McpResponse, RateLimitedError> {
    let info = limiter.allow(&auth.0.agent_id, rate_config);
    if !info.allowed {
        return Err(RateLimitedError { info });
    }

    let incoming: IncomingMessage = match serde_json::from_value(body.into_inner()) {
        Ok(m) => m,
        Err(e) => return Ok(McpResponse::BadRequest(e.to_string())),
    };

    let existing_sid = session_header(req);
    let (caller, new_session_id) = match existing_sid {
        Some(sid) => match sessions.get(&sid) {
            Some(entry) => (entry, None),
            None => return Ok(McpResponse::SessionNotFound),
        },
        None => {
            let entry = SessionEntry {
                agent_id: auth.0.agent_id.clone(),
                agent_name: auth.0.agent_name.clone(),
                clearance_level: auth.0.clearance_level,
            };
            let sid = sessions.create(entry.clone());
            (entry, Some(sid))
        }
    };

    if incoming.is_notification() {
        // Errors on notifications are only logged (§7 "Propagation policy").
        if incoming.method != "notifications/initialized" {
            tracing::debug!(method = %incoming.method, "unhandled notification");
        }
        return Ok(McpResponse::Accepted);
    }

    let response = handle_request(db, &caller, incoming);
    Ok(McpResponse::Reply {
        session_id: new_session_id,
        body: response,
    })
}

#[delete("/mcp")]
pub fn mcp_delete(
    req: &Request<'_>,
    auth: AuthenticatedAgent,
    sessions: &State<SessionManager>,
    limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
) -> Result<McpResponse, RateLimitedError> {
    let info = limiter.allow(&auth.0.agent_id, rate_config);
    if !info.allowed {
        return Err(RateLimitedError { info });
    }

    match session_header(req) {
        Some(sid) if sessions.get(&sid).is_some() => {
            sessions.remove(&sid);
            Ok(McpResponse::Closed)
        }
        _ => Ok(McpResponse::SessionNotFound),
    }
}

/// `GET /mcp` without an existing session is 400 — the streaming channel
/// only attaches to an already-initialized session (§4.6, §7.4).
#[get("/mcp")]
pub fn mcp_get(
    req: &Request<'_>,
    auth: AuthenticatedAgent,
    db: &State<Db>,
    sessions: &State<SessionManager>,
    limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
) -> Result<EventStream![], (Status, McpResponse)> {
    let info = limiter.allow(&auth.0.agent_id, rate_config);
    if !info.allowed {
        return Err((Status::TooManyRequests, McpResponse::Accepted));
    }

    let sid = match session_header(req) {
        Some(sid) => sid,
        None => return Err((Status::BadRequest, McpResponse::BadRequest("GET requires mcp-session-id".into()))),
    };
    let entry = match sessions.get(&sid) {
        Some(e) => e,
        None => return Err((Status::NotFound, McpResponse::SessionNotFound)),
    };

    let mut rx = db.subscribe_events();
    let db_inner: &Db = db.inner();
    let my_id = entry.agent_id.clone();
    let my_clearance = entry.clearance_level;
    let manager: &SessionManager = sessions.inner();

    Ok(EventStream! {
        let _guard = SessionGuard { manager, session_id: sid };
        let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(15));

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Ok(BusEvent::MessageCreated(message)) => {
                            let subs = db_inner.list_subscribers(&message.conversation_id).unwrap_or_default();
                            let mine = subs.iter().find(|s| s.agent_id == my_id);
                            if let Some(sub) = mine
                                && is_eligible(&message, sub, my_clearance)
                            {
                                let params = preview_notification(&message);
                                let notif = notification("notifications/message", serde_json::to_value(&params).unwrap_or_default());
                                yield Event::json(&notif).event("message");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "SSE receiver lagged, missed notifications");
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    yield Event::comment("heartbeat");
                }
            }
        }
    })
}
