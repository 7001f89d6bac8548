//! Persisted entities and the request/response DTOs built on top of them
//! (§3 DATA MODEL). Plain serde structs, in the teacher's DTO idiom:
//! `#[serde(default)]` for optional tool arguments, `skip_serializing_if`
//! for fields that are absent rather than null on the wire.

use crate::visibility::Visibility;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub clearance_level: Visibility,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub last_seen_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialityMode {
    Normal,
    Strict,
    Flexible,
}

impl ConfidentialityMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "strict" => Some(Self::Strict),
            "flexible" => Some(Self::Flexible),
            _ => None,
        }
    }
}

impl Default for ConfidentialityMode {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub visibility: Visibility,
    pub confidentiality_mode: ConfidentialityMode,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub title: String,
    pub tags: Vec<String>,
    pub priority: String,
    pub visibility: Visibility,
    pub content: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub default_visibility: Visibility,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAccess {
    Full,
    FromJoin,
}

impl Default for HistoryAccess {
    fn default() -> Self {
        Self::Full
    }
}

impl HistoryAccess {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "from_join" => Some(Self::FromJoin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub conversation_id: String,
    pub agent_id: String,
    pub history_access: HistoryAccess,
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    Spec,
    Result,
    Review,
    Status,
    Question,
}

impl MessageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "spec" => Some(Self::Spec),
            "result" => Some(Self::Result),
            "review" => Some(Self::Review),
            "status" => Some(Self::Status),
            "question" => Some(Self::Question),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::Spec => "spec",
            MessageType::Result => "result",
            MessageType::Review => "review",
            MessageType::Status => "status",
            MessageType::Question => "question",
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Message
    }
}

/// Server-authored, trusted. Never share a type with `agentMetadata` — they
/// carry opposite trust labels (§9 "Dynamic shapes").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMetadata {
    pub visibility: Visibility,
    pub sender_clearance: Visibility,
    pub visibility_capped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_visibility: Option<Visibility>,
    pub timestamp: String,
    pub instructions: ConfidentialityInstructions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidentialityInstructions {
    pub mode: String,
    pub confidentiality: String,
}

/// Pre-computed per `project.confidentialityMode`, attached to every
/// outgoing message's `bridgeMetadata.instructions`.
pub fn instructions_for(mode: ConfidentialityMode) -> ConfidentialityInstructions {
    let confidentiality = match mode {
        ConfidentialityMode::Normal => {
            "bridge enforces visibility at read time; no additional handling required"
        }
        ConfidentialityMode::Strict => {
            "any visibility level above team must be treated as sensitive; do not restate outside this conversation"
        }
        ConfidentialityMode::Flexible => {
            "visibility is advisory; the bridge still enforces clearance at read time"
        }
    };
    ConfidentialityInstructions {
        mode: match mode {
            ConfidentialityMode::Normal => "normal".to_string(),
            ConfidentialityMode::Strict => "strict".to_string(),
            ConfidentialityMode::Flexible => "flexible".to_string(),
        },
        confidentiality: confidentiality.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub from_agent: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub visibility: Visibility,
    pub content: String,
    /// Sender-authored, private; stripped of forge keys before persistence.
    /// `get_messages` omits this for any message whose `fromAgent != me`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_metadata: Option<serde_json::Value>,
    pub bridge_metadata: BridgeMetadata,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMark {
    pub message_id: String,
    pub agent_id: String,
    pub read_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighWaterMark {
    pub agent_id: String,
    pub project_id: String,
    pub max_visibility: Visibility,
    pub updated_at: String,
}

// --- tool input DTOs ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentInput {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub clearance_level: Option<Visibility>,
    /// Never client-writable via the `register_agent` tool; only set by
    /// the authenticator on first registration (§4.7).
    #[serde(skip)]
    pub api_key_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub confidentiality_mode: Option<ConfidentialityMode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMemoryInput {
    pub project_id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub content: String,
}

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMemoryFilters {
    #[serde(default, rename = "type")]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationInput {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub default_visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeInput {
    pub conversation_id: String,
    #[serde(default)]
    pub history_access: Option<HistoryAccess>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageInput {
    pub conversation_id: String,
    #[serde(rename = "type", default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesOpts {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadInput {
    pub conversation_id: String,
    #[serde(default)]
    pub up_to_message_id: Option<String>,
}
