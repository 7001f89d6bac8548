//! Tool surface (C7): the fixed set of JSON-RPC tools exposed to an
//! authenticated agent, each bound to the caller's `agentId` for the
//! lifetime of its session (§9 "Single dispatch, multiple scopes").
//!
//! `dispatch` is the factory described there: it takes the caller once
//! and produces whichever handler the method name selects, instead of
//! threading `agentId` through every call site by hand.

use crate::db::Db;
use crate::error::McpError;
use crate::models::*;
use crate::session::SessionEntry;
use serde_json::{json, Value};

/// `{error: "Not found or access denied"}` — §4.7's uniform denial body;
/// never distinguishes absent from forbidden.
fn denied() -> McpError {
    McpError::NotFoundOrDenied
}

pub fn dispatch(name: &str, args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    match name {
        "register_agent" => register_agent(args, db, caller),
        "list_agents" => list_agents(args, db, caller),
        "create_project" => create_project(args, db, caller),
        "list_projects" => list_projects(db, caller),
        "get_memory" => get_memory(args, db, caller),
        "set_memory" => set_memory(args, db, caller),
        "delete_memory" => delete_memory(args, db, caller),
        "create_conversation" => create_conversation(args, db, caller),
        "list_conversations" => list_conversations(args, db, caller),
        "subscribe" => subscribe(args, db, caller),
        "unsubscribe" => unsubscribe(args, db, caller),
        "list_subscribers" => list_subscribers(args, db, caller),
        "send_message" => send_message(args, db, caller),
        "get_messages" => get_messages(args, db, caller),
        "get_status" => get_status(args, db, caller),
        "mark_read" => mark_read(args, db, caller),
        other => Err(McpError::MethodNotFound {
            method: other.to_string(),
        }),
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, McpError> {
    serde_json::from_value(args).map_err(|e| McpError::InvalidParams {
        message: e.to_string(),
    })
}

/// Only updates `name`/`type`/`capabilities` for the caller's own agent;
/// clearance and hash are never client-writable (§4.7). The tool layer
/// pins `name` to the caller's own so a client can't rename into another
/// agent's identity.
fn register_agent(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        #[serde(rename = "type")]
        agent_type: String,
        #[serde(default)]
        capabilities: Vec<String>,
    }
    let args: Args = parse(args)?;
    let input = RegisterAgentInput {
        name: caller.agent_name.clone(),
        agent_type: args.agent_type,
        capabilities: args.capabilities,
        clearance_level: Some(caller.clearance_level),
        api_key_hash: None,
    };
    let agent = db.register_agent(input)?;
    Ok(json!(agent))
}

fn list_agents(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        #[serde(default)]
        project_id: Option<String>,
    }
    let args: Args = parse(args)?;
    let agents = db.list_agents(args.project_id.as_deref(), &caller.agent_id)?;
    Ok(json!(agents))
}

/// `create_conversation`'s project-access gate, `set_memory`'s, and every
/// other "caller can access project" gate funnel through this: a `None`
/// from `get_project` already means absent-or-forbidden.
fn require_project_access(db: &Db, project_id: &str, caller: &SessionEntry) -> Result<Project, McpError> {
    db.get_project(project_id, &caller.agent_id)?.ok_or_else(denied)
}

fn create_project(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let input: CreateProjectInput = parse(args)?;
    let project = db.create_project(input, &caller.agent_id)?;
    Ok(json!(project))
}

fn list_projects(db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let projects = db.list_projects(&caller.agent_id)?;
    Ok(json!(projects))
}

fn get_memory(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        project_id: String,
        #[serde(flatten)]
        filters: GetMemoryFilters,
    }
    let args: Args = parse(args)?;
    require_project_access(db, &args.project_id, caller)?;
    let entries = db.get_memory(&args.project_id, &caller.agent_id, args.filters)?;
    Ok(json!(entries))
}

fn set_memory(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let input: SetMemoryInput = parse(args)?;
    require_project_access(db, &input.project_id, caller)?;
    let entry = db.set_memory(input, &caller.agent_id)?;
    Ok(json!(entry))
}

/// Entry exists AND `entry.createdBy == me` AND project accessible (§4.7).
fn delete_memory(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        id: String,
    }
    let args: Args = parse(args)?;
    let entry = db.get_memory_entry(&args.id)?.ok_or_else(denied)?;
    if entry.created_by != caller.agent_id {
        return Err(denied());
    }
    require_project_access(db, &entry.project_id, caller)?;
    let deleted = db.delete_memory(&args.id)?;
    Ok(json!({ "deleted": deleted }))
}

fn create_conversation(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let input: CreateConversationInput = parse(args)?;
    require_project_access(db, &input.project_id, caller)?;
    let conversation = db.create_conversation(input, &caller.agent_id)?;
    // The store does not auto-subscribe the creator; the tool layer does (§4.2).
    db.subscribe(&conversation.id, &caller.agent_id, HistoryAccess::Full)?;
    Ok(json!(conversation))
}

fn list_conversations(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        project_id: String,
    }
    let args: Args = parse(args)?;
    let conversations = db.list_conversations(&args.project_id, &caller.agent_id)?;
    Ok(json!(conversations))
}

fn require_conversation_access(db: &Db, project_id: &str, caller: &SessionEntry) -> Result<(), McpError> {
    require_project_access(db, project_id, caller)?;
    Ok(())
}

fn subscribe(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let input: SubscribeInput = parse(args)?;
    let conversation = db
        .get_conversation(&input.conversation_id)?
        .ok_or_else(denied)?;
    require_conversation_access(db, &conversation.project_id, caller)?;
    let sub = db.subscribe(
        &input.conversation_id,
        &caller.agent_id,
        input.history_access.unwrap_or_default(),
    )?;
    Ok(json!(sub))
}

fn require_subscribed(db: &Db, conversation_id: &str, caller: &SessionEntry) -> Result<(), McpError> {
    if db.is_subscribed(conversation_id, &caller.agent_id)? {
        Ok(())
    } else {
        Err(denied())
    }
}

fn unsubscribe(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        conversation_id: String,
    }
    let args: Args = parse(args)?;
    db.unsubscribe(&args.conversation_id, &caller.agent_id)?;
    Ok(json!({ "unsubscribed": true }))
}

fn list_subscribers(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        conversation_id: String,
    }
    let args: Args = parse(args)?;
    require_subscribed(db, &args.conversation_id, caller)?;
    let subs = db.list_subscribers(&args.conversation_id)?;
    Ok(json!(subs))
}

fn send_message(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    let input: SendMessageInput = parse(args)?;
    require_subscribed(db, &input.conversation_id, caller)?;
    let message = db.send_message(input, &caller.agent_id)?;
    // Response omits the deprecated flat `metadata`; always includes
    // `bridgeMetadata` plus the sender's own `agentMetadata` (§4.7).
    Ok(json!(message))
}

fn get_messages(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        conversation_id: String,
        #[serde(flatten)]
        opts: GetMessagesOpts,
    }
    let args: Args = parse(args)?;
    require_subscribed(db, &args.conversation_id, caller)?;
    let messages = db.get_messages(&args.conversation_id, &caller.agent_id, args.opts)?;
    Ok(json!(messages))
}

fn get_status(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        #[serde(default)]
        project_id: Option<String>,
    }
    let args: Args = parse(args)?;
    let unread_count = db.get_unread_count(&caller.agent_id)?;
    let high_water_mark = match &args.project_id {
        Some(project_id) => db.get_high_water_mark(&caller.agent_id, project_id)?,
        None => None,
    };
    Ok(json!({
        "agentId": caller.agent_id,
        "clearanceLevel": caller.clearance_level,
        "unreadCount": unread_count,
        "highWaterMark": high_water_mark,
    }))
}

/// With `up_to_message_id`: fetch the caller's visible messages in
/// `createdAt asc` order, mark every message up to and including the
/// target; target missing → `{marked:0}`. Without it, mark all visible
/// messages in the conversation (§4.7).
fn mark_read(args: Value, db: &Db, caller: &SessionEntry) -> Result<Value, McpError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        conversation_id: String,
        #[serde(default)]
        up_to_message_id: Option<String>,
    }
    let args: Args = parse(args)?;
    require_subscribed(db, &args.conversation_id, caller)?;

    let visible = db.get_messages(
        &args.conversation_id,
        &caller.agent_id,
        GetMessagesOpts {
            since: None,
            unread_only: false,
            limit: None,
        },
    )?;

    let ids: Vec<String> = match &args.up_to_message_id {
        None => visible.into_iter().map(|m| m.id).collect(),
        Some(target) => {
            let mut ids = Vec::new();
            let mut found = false;
            for m in visible {
                let is_target = m.id == *target;
                ids.push(m.id);
                if is_target {
                    found = true;
                    break;
                }
            }
            if !found {
                return Ok(json!({ "marked": 0 }));
            }
            ids
        }
    };

    let marked = ids.len();
    db.mark_read(&ids, &caller.agent_id)?;
    Ok(json!({ "marked": marked }))
}

/// Schemas for `tools/list` — defaults and enums per §4.7, no external
/// validation crate: the dispatch handlers above are the enforcement,
/// this is advertisement only.
pub fn tool_definitions() -> Vec<crate::protocol::McpTool> {
    use crate::protocol::McpTool;
    let visibility_enum = json!(["public", "team", "confidential", "restricted"]);
    macro_rules! tool {
        ($name:expr, $desc:expr, $schema:expr) => {
            McpTool {
                name: $name.to_string(),
                description: $desc.to_string(),
                input_schema: $schema,
            }
        };
    }
    vec![
        tool!(
            "register_agent",
            "Register or refresh this agent's name/type/capabilities.",
            json!({"type":"object","properties":{
                "type":{"type":"string"},
                "capabilities":{"type":"array","items":{"type":"string"},"default":[]}
            },"required":["type"]})
        ),
        tool!(
            "list_agents",
            "List known agents, optionally scoped to a project's visible subscribers.",
            json!({"type":"object","properties":{"projectId":{"type":"string"}}})
        ),
        tool!(
            "create_project",
            "Create a project.",
            json!({"type":"object","properties":{
                "name":{"type":"string"},
                "description":{"type":"string"},
                "visibility":{"enum":visibility_enum,"default":"team"},
                "confidentialityMode":{"enum":["normal","strict","flexible"],"default":"normal"}
            },"required":["name"]})
        ),
        tool!(
            "list_projects",
            "List projects visible to this agent's clearance.",
            json!({"type":"object","properties":{}})
        ),
        tool!(
            "get_memory",
            "Fetch project memory entries visible to this agent.",
            json!({"type":"object","properties":{
                "projectId":{"type":"string"},
                "type":{"type":"string"},
                "tags":{"type":"array","items":{"type":"string"}},
                "limit":{"type":"integer"}
            },"required":["projectId"]})
        ),
        tool!(
            "set_memory",
            "Create a project memory entry.",
            json!({"type":"object","properties":{
                "projectId":{"type":"string"},
                "type":{"type":"string"},
                "title":{"type":"string"},
                "tags":{"type":"array","items":{"type":"string"},"default":[]},
                "priority":{"type":"string","default":"normal"},
                "visibility":{"enum":visibility_enum,"default":"team"},
                "content":{"type":"string"}
            },"required":["projectId","type","title","content"]})
        ),
        tool!(
            "delete_memory",
            "Delete a memory entry you created.",
            json!({"type":"object","properties":{"id":{"type":"string"}},"required":["id"]})
        ),
        tool!(
            "create_conversation",
            "Create a conversation within a project.",
            json!({"type":"object","properties":{
                "projectId":{"type":"string"},
                "title":{"type":"string"},
                "defaultVisibility":{"enum":visibility_enum,"default":"team"}
            },"required":["projectId","title"]})
        ),
        tool!(
            "list_conversations",
            "List conversations within a project visible to this agent.",
            json!({"type":"object","properties":{"projectId":{"type":"string"}},"required":["projectId"]})
        ),
        tool!(
            "subscribe",
            "Subscribe to a conversation.",
            json!({"type":"object","properties":{
                "conversationId":{"type":"string"},
                "historyAccess":{"enum":["full","from_join"],"default":"full"}
            },"required":["conversationId"]})
        ),
        tool!(
            "unsubscribe",
            "Unsubscribe from a conversation.",
            json!({"type":"object","properties":{"conversationId":{"type":"string"}},"required":["conversationId"]})
        ),
        tool!(
            "list_subscribers",
            "List subscribers of a conversation you're subscribed to.",
            json!({"type":"object","properties":{"conversationId":{"type":"string"}},"required":["conversationId"]})
        ),
        tool!(
            "send_message",
            "Send a message into a conversation you're subscribed to.",
            json!({"type":"object","properties":{
                "conversationId":{"type":"string"},
                "type":{"enum":["message","spec","result","review","status","question"],"default":"message"},
                "visibility":{"enum":visibility_enum,"default":"team"},
                "content":{"type":"string"},
                "metadata":{"type":"object"}
            },"required":["conversationId","content"]})
        ),
        tool!(
            "get_messages",
            "Fetch messages in a conversation you're subscribed to.",
            json!({"type":"object","properties":{
                "conversationId":{"type":"string"},
                "since":{"type":"string"},
                "unreadOnly":{"type":"boolean","default":false},
                "limit":{"type":"integer"}
            },"required":["conversationId"]})
        ),
        tool!(
            "get_status",
            "Fetch this agent's unread count and, optionally, a project's high-water mark.",
            json!({"type":"object","properties":{"projectId":{"type":"string"}}})
        ),
        tool!(
            "mark_read",
            "Mark messages in a conversation as read.",
            json!({"type":"object","properties":{
                "conversationId":{"type":"string"},
                "upToMessageId":{"type":"string"}
            },"required":["conversationId"]})
        ),
    ]
}
