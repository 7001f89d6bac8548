//! Persistent store (C2): the visibility-enforcing data layer.
//!
//! Single `rusqlite::Connection` behind a `Mutex`, WAL journal mode,
//! foreign keys enforced — the teacher's exact persistence idiom. Every
//! read that returns user-visible data takes the caller's `agentId` and
//! performs clearance filtering here, in application logic, strictly
//! after the SQL query runs; any `limit` is applied after filtering
//! (§4.2 "Listing/filtering rule").

use crate::events::{BusEvent, EventBus};
use crate::models::*;
use crate::visibility::{cap, can_see, raise, Visibility};
use crate::error::StoreError;
use rusqlite::{params, Connection};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct Db {
    conn: Mutex<Connection>,
    events: EventBus,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Strip any top-level key matching `^_?bridge` (case-insensitive) before
/// persistence (§3 invariant, §4.2 step 3).
fn strip_forge_keys(value: serde_json::Value) -> Option<serde_json::Value> {
    let obj = value.as_object()?;
    let filtered: serde_json::Map<String, serde_json::Value> = obj
        .iter()
        .filter(|(k, _)| !is_forge_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(filtered))
    }
}

fn is_forge_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("bridge") || lower.strip_prefix('_').is_some_and(|rest| rest.starts_with("bridge"))
}

impl Db {
    /// `path` may be a filesystem path or `:memory:` (used by tests).
    pub fn new(path: &str) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self::new_with_events(path, tx)
    }

    pub fn new_with_events(path: &str, events: broadcast::Sender<BusEvent>) -> Self {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(path).expect("failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        let db = Db {
            conn: Mutex::new(conn),
            events: EventBus { sender: events },
        };
        db.migrate();
        db
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Clones the underlying broadcast sender so a second `Db` handle (the
    /// internal agent runner's own connection) publishes onto the same bus
    /// every `GET /mcp` stream is listening on.
    pub fn events_sender(&self) -> broadcast::Sender<BusEvent> {
        self.events.sender.clone()
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '[]',
                clearance_level INTEGER NOT NULL,
                api_key_hash TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                visibility INTEGER NOT NULL,
                confidentiality_mode TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_memory (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                priority TEXT NOT NULL DEFAULT 'normal',
                visibility INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_project_type ON project_memory(project_id, type);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                default_visibility INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_agents (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL,
                history_access TEXT NOT NULL DEFAULT 'full',
                joined_at TEXT NOT NULL,
                PRIMARY KEY (conversation_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_conv_agents_agent ON conversation_agents(agent_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                from_agent TEXT NOT NULL,
                type TEXT NOT NULL,
                visibility INTEGER NOT NULL,
                content TEXT NOT NULL,
                agent_metadata TEXT,
                bridge_metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conv_created ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS message_reads (
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL,
                read_at TEXT NOT NULL,
                PRIMARY KEY (message_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS agent_project_hwm (
                agent_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                max_visibility INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (agent_id, project_id)
            );",
        )
        .expect("failed to run migrations");
    }

    // --- agents ---

    pub fn register_agent(&self, input: RegisterAgentInput) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT id, created_at FROM agents WHERE name = ?1",
                params![input.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let ts = now();
        let clearance = input.clearance_level.unwrap_or(Visibility::Team);
        let capabilities = serde_json::to_string(&input.capabilities)?;
        let hash = input.api_key_hash.unwrap_or_default();

        let (id, created_at) = match existing {
            Some((id, created_at)) => {
                conn.execute(
                    "UPDATE agents SET type = ?1, capabilities = ?2, clearance_level = ?3,
                         api_key_hash = COALESCE(NULLIF(?4, ''), api_key_hash), last_seen_at = ?5
                     WHERE id = ?6",
                    params![
                        input.agent_type,
                        capabilities,
                        clearance.as_i64(),
                        hash,
                        ts,
                        id
                    ],
                )?;
                (id, created_at)
            }
            None => {
                let id = new_id();
                conn.execute(
                    "INSERT INTO agents (id, name, type, capabilities, clearance_level, api_key_hash, last_seen_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![id, input.name, input.agent_type, capabilities, clearance.as_i64(), hash, ts],
                )?;
                (id, ts.clone())
            }
        };

        Ok(Agent {
            id,
            name: input.name,
            agent_type: input.agent_type,
            capabilities: input.capabilities,
            clearance_level: clearance,
            api_key_hash: hash,
            last_seen_at: ts,
            created_at,
        })
    }

    pub fn update_agent_last_seen(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET last_seen_at = ?1 WHERE id = ?2",
            params![now(), agent_id],
        )?;
        Ok(())
    }

    pub fn get_agent_by_id(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_agent(&conn, "id", agent_id)
    }

    pub fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_agent(&conn, "name", name)
    }

    fn query_agent(conn: &Connection, column: &str, value: &str) -> Result<Option<Agent>, StoreError> {
        let sql = format!(
            "SELECT id, name, type, capabilities, clearance_level, api_key_hash, last_seen_at, created_at
             FROM agents WHERE {column} = ?1"
        );
        let agent = conn
            .query_row(&sql, params![value], |row| Self::row_to_agent(row))
            .ok();
        Ok(agent)
    }

    fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
        let capabilities_str: String = row.get(3)?;
        let clearance_raw: i64 = row.get(4)?;
        Ok(Agent {
            id: row.get(0)?,
            name: row.get(1)?,
            agent_type: row.get(2)?,
            capabilities: serde_json::from_str(&capabilities_str).unwrap_or_default(),
            clearance_level: Visibility::from_i64(clearance_raw).unwrap_or(Visibility::Public),
            api_key_hash: row.get(5)?,
            last_seen_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// With `project_id`, restricted to the union of subscribers over the
    /// conversations `caller` can see in that project (§4.7 table). Without
    /// one, the full roster — listing known collaborators is not itself
    /// visibility-sensitive.
    pub fn list_agents(
        &self,
        project_id: Option<&str>,
        caller_id: &str,
    ) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        match project_id {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, name, type, capabilities, clearance_level, api_key_hash, last_seen_at, created_at
                     FROM agents ORDER BY name ASC",
                )?;
                let agents = stmt
                    .query_map([], Self::row_to_agent)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(agents)
            }
            Some(project_id) => {
                let caller_clearance = match Self::query_agent(&conn, "id", caller_id)? {
                    Some(a) => a.clearance_level,
                    None => return Err(StoreError::NotFound),
                };
                let project = Self::query_project(&conn, project_id)?.ok_or(StoreError::NotFound)?;
                if !can_see(caller_clearance, project.visibility) {
                    return Err(StoreError::Forbidden);
                }
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT a.id, a.name, a.type, a.capabilities, a.clearance_level, a.api_key_hash, a.last_seen_at, a.created_at
                     FROM agents a
                     JOIN conversation_agents ca ON ca.agent_id = a.id
                     JOIN conversations c ON c.id = ca.conversation_id
                     WHERE c.project_id = ?1 AND c.default_visibility <= ?2
                     ORDER BY a.name ASC",
                )?;
                let agents = stmt
                    .query_map(params![project_id, caller_clearance.as_i64()], Self::row_to_agent)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(agents)
            }
        }
    }

    // --- projects ---

    pub fn create_project(
        &self,
        input: CreateProjectInput,
        created_by: &str,
    ) -> Result<Project, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let ts = now();
        let visibility = input.visibility.unwrap_or(Visibility::Team);
        let mode = input.confidentiality_mode.unwrap_or(ConfidentialityMode::Normal);
        conn.execute(
            "INSERT INTO projects (id, name, description, visibility, confidentiality_mode, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                input.name,
                input.description,
                visibility.as_i64(),
                serde_json::to_value(&mode)?.as_str().unwrap_or("normal"),
                created_by,
                ts
            ],
        )?;
        Ok(Project {
            id,
            name: input.name,
            description: input.description,
            visibility,
            confidentiality_mode: mode,
            created_by: created_by.to_string(),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    fn query_project(conn: &Connection, id: &str) -> Result<Option<Project>, StoreError> {
        let project = conn
            .query_row(
                "SELECT id, name, description, visibility, confidentiality_mode, created_by, created_at, updated_at
                 FROM projects WHERE id = ?1",
                params![id],
                Self::row_to_project,
            )
            .ok();
        Ok(project)
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        let visibility_raw: i64 = row.get(3)?;
        let mode_str: String = row.get(4)?;
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            visibility: Visibility::from_i64(visibility_raw).unwrap_or(Visibility::Team),
            confidentiality_mode: ConfidentialityMode::parse(&mode_str).unwrap_or(ConfidentialityMode::Normal),
            created_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// Returns `None` both when absent and when inaccessible — callers
    /// collapse that into "Not found or access denied" (§4.7).
    pub fn get_project(&self, project_id: &str, agent_id: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Ok(None),
        };
        let project = Self::query_project(&conn, project_id)?;
        Ok(project.filter(|p| can_see(clearance, p.visibility)))
    }

    pub fn list_projects(&self, agent_id: &str) -> Result<Vec<Project>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Err(StoreError::NotFound),
        };
        let mut stmt = conn.prepare(
            "SELECT id, name, description, visibility, confidentiality_mode, created_by, created_at, updated_at
             FROM projects ORDER BY updated_at DESC",
        )?;
        let projects: Vec<Project> = stmt
            .query_map([], Self::row_to_project)?
            .filter_map(|r| r.ok())
            .filter(|p| can_see(clearance, p.visibility))
            .collect();
        Ok(projects)
    }

    // --- conversations ---

    pub fn create_conversation(
        &self,
        input: CreateConversationInput,
        created_by: &str,
    ) -> Result<Conversation, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let ts = now();
        let default_visibility = input.default_visibility.unwrap_or(Visibility::Team);
        conn.execute(
            "INSERT INTO conversations (id, project_id, title, status, default_visibility, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6, ?6)",
            params![id, input.project_id, input.title, default_visibility.as_i64(), created_by, ts],
        )?;
        Ok(Conversation {
            id,
            project_id: input.project_id,
            title: input.title,
            status: ConversationStatus::Active,
            default_visibility,
            created_by: created_by.to_string(),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_conversation(&conn, conversation_id)
    }

    fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conv = conn
            .query_row(
                "SELECT id, project_id, title, status, default_visibility, created_by, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![id],
                Self::row_to_conversation,
            )
            .ok();
        Ok(conv)
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        let status_str: String = row.get(3)?;
        let visibility_raw: i64 = row.get(4)?;
        Ok(Conversation {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            status: if status_str == "archived" {
                ConversationStatus::Archived
            } else {
                ConversationStatus::Active
            },
            default_visibility: Visibility::from_i64(visibility_raw).unwrap_or(Visibility::Team),
            created_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub fn list_conversations(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Err(StoreError::NotFound),
        };
        let project = Self::query_project(&conn, project_id)?;
        let project = match project {
            Some(p) if can_see(clearance, p.visibility) => p,
            _ => return Ok(vec![]),
        };
        let mut stmt = conn.prepare(
            "SELECT id, project_id, title, status, default_visibility, created_by, created_at, updated_at
             FROM conversations WHERE project_id = ?1 ORDER BY updated_at DESC",
        )?;
        let conversations: Vec<Conversation> = stmt
            .query_map(params![project.id], Self::row_to_conversation)?
            .filter_map(|r| r.ok())
            .filter(|c| can_see(clearance, c.default_visibility))
            .collect();
        Ok(conversations)
    }

    // --- subscriptions ---

    pub fn subscribe(
        &self,
        conversation_id: &str,
        agent_id: &str,
        history_access: HistoryAccess,
    ) -> Result<Subscription, StoreError> {
        let conn = self.conn.lock().unwrap();
        let ts = now();
        let access_str = match history_access {
            HistoryAccess::Full => "full",
            HistoryAccess::FromJoin => "from_join",
        };
        conn.execute(
            "INSERT INTO conversation_agents (conversation_id, agent_id, history_access, joined_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id, agent_id) DO UPDATE SET history_access = excluded.history_access",
            params![conversation_id, agent_id, access_str, ts],
        )?;
        Ok(Subscription {
            conversation_id: conversation_id.to_string(),
            agent_id: agent_id.to_string(),
            history_access,
            joined_at: ts,
        })
    }

    pub fn unsubscribe(&self, conversation_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM conversation_agents WHERE conversation_id = ?1 AND agent_id = ?2",
            params![conversation_id, agent_id],
        )?;
        Ok(())
    }

    pub fn is_subscribed(&self, conversation_id: &str, agent_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_agents WHERE conversation_id = ?1 AND agent_id = ?2",
            params![conversation_id, agent_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_subscribers(&self, conversation_id: &str) -> Result<Vec<Subscription>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT conversation_id, agent_id, history_access, joined_at FROM conversation_agents WHERE conversation_id = ?1",
        )?;
        let subs = stmt
            .query_map(params![conversation_id], |row| {
                let access_str: String = row.get(2)?;
                Ok(Subscription {
                    conversation_id: row.get(0)?,
                    agent_id: row.get(1)?,
                    history_access: HistoryAccess::parse(&access_str).unwrap_or(HistoryAccess::Full),
                    joined_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(subs)
    }

    // --- memory ---

    pub fn set_memory(&self, input: SetMemoryInput, created_by: &str) -> Result<MemoryEntry, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let ts = now();
        let visibility = input.visibility.unwrap_or(Visibility::Team);
        let tags_json = serde_json::to_string(&input.tags)?;
        conn.execute(
            "INSERT INTO project_memory (id, project_id, type, title, tags, priority, visibility, content, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                input.project_id,
                input.entry_type,
                input.title,
                tags_json,
                input.priority,
                visibility.as_i64(),
                input.content,
                created_by,
                ts
            ],
        )?;
        Ok(MemoryEntry {
            id,
            project_id: input.project_id,
            entry_type: input.entry_type,
            title: input.title,
            tags: input.tags,
            priority: input.priority,
            visibility,
            content: input.content,
            created_by: created_by.to_string(),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    /// Entry existence/ownership gate (`entry.createdBy == me`) is the tool
    /// layer's job (§4.7); this hard-deletes by id and reports whether a
    /// row existed.
    pub fn delete_memory(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM project_memory WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn get_memory_entry(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT id, project_id, type, title, tags, priority, visibility, content, created_by, created_at, updated_at
                 FROM project_memory WHERE id = ?1",
                params![id],
                Self::row_to_memory,
            )
            .ok();
        Ok(entry)
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<MemoryEntry> {
        let tags_str: String = row.get(4)?;
        let visibility_raw: i64 = row.get(6)?;
        Ok(MemoryEntry {
            id: row.get(0)?,
            project_id: row.get(1)?,
            entry_type: row.get(2)?,
            title: row.get(3)?,
            tags: serde_json::from_str(&tags_str).unwrap_or_default(),
            priority: row.get(5)?,
            visibility: Visibility::from_i64(visibility_raw).unwrap_or(Visibility::Team),
            content: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    pub fn get_memory(
        &self,
        project_id: &str,
        agent_id: &str,
        filters: GetMemoryFilters,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Err(StoreError::NotFound),
        };

        let mut sql = "SELECT id, project_id, type, title, tags, priority, visibility, content, created_by, created_at, updated_at
             FROM project_memory WHERE project_id = ?1".to_string();
        if filters.entry_type.is_some() {
            sql.push_str(" AND type = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<MemoryEntry> = if let Some(ref entry_type) = filters.entry_type {
            stmt.query_map(params![project_id, entry_type], Self::row_to_memory)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map(params![project_id], Self::row_to_memory)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut filtered: Vec<MemoryEntry> = rows
            .into_iter()
            .filter(|m| can_see(clearance, m.visibility))
            .filter(|m| match &filters.tags {
                None => true,
                Some(wanted) => wanted.iter().any(|t| m.tags.contains(t)),
            })
            .collect();

        if let Some(limit) = filters.limit {
            filtered.truncate(limit);
        }
        Ok(filtered)
    }

    // --- messages ---

    pub fn send_message(
        &self,
        input: SendMessageInput,
        from_agent: &str,
    ) -> Result<Message, StoreError> {
        let conn = self.conn.lock().unwrap();

        let sender = Self::query_agent(&conn, "id", from_agent)?.ok_or(StoreError::NotFound)?;
        let conversation =
            Self::query_conversation(&conn, &input.conversation_id)?.ok_or(StoreError::NotFound)?;
        let project =
            Self::query_project(&conn, &conversation.project_id)?.ok_or(StoreError::NotFound)?;

        let requested = input.visibility.unwrap_or(Visibility::Team);
        let capped = cap(requested, sender.clearance_level);
        let visibility_capped = capped != requested;

        let agent_metadata = input.metadata.and_then(strip_forge_keys);

        let ts = now();
        let bridge_metadata = BridgeMetadata {
            visibility: capped,
            sender_clearance: sender.clearance_level,
            visibility_capped,
            original_visibility: if visibility_capped { Some(requested) } else { None },
            timestamp: ts.clone(),
            instructions: instructions_for(project.confidentiality_mode),
        };

        let message_type = input.message_type.unwrap_or(MessageType::Message);
        let id = new_id();

        conn.execute(
            "INSERT INTO messages (id, conversation_id, from_agent, type, visibility, content, agent_metadata, bridge_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                input.conversation_id,
                from_agent,
                message_type.as_str(),
                capped.as_i64(),
                input.content,
                agent_metadata.as_ref().map(|v| v.to_string()),
                serde_json::to_string(&bridge_metadata)?,
                ts
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![ts, input.conversation_id],
        )?;

        let message = Message {
            id,
            conversation_id: input.conversation_id,
            from_agent: from_agent.to_string(),
            message_type,
            visibility: capped,
            content: input.content,
            agent_metadata,
            bridge_metadata,
            created_at: ts,
        };

        // Fire after commit, exactly once, synchronously (§4.3).
        self.events.publish(BusEvent::MessageCreated(message.clone()));

        Ok(message)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let type_str: String = row.get(3)?;
        let visibility_raw: i64 = row.get(4)?;
        let agent_metadata_str: Option<String> = row.get(6)?;
        let bridge_metadata_str: String = row.get(7)?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            from_agent: row.get(2)?,
            message_type: MessageType::parse(&type_str).unwrap_or(MessageType::Message),
            visibility: Visibility::from_i64(visibility_raw).unwrap_or(Visibility::Team),
            content: row.get(5)?,
            agent_metadata: agent_metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            bridge_metadata: serde_json::from_str(&bridge_metadata_str).unwrap_or_else(|_| BridgeMetadata {
                visibility: Visibility::Team,
                sender_clearance: Visibility::Team,
                visibility_capped: false,
                original_visibility: None,
                timestamp: String::new(),
                instructions: ConfidentialityInstructions {
                    mode: "normal".into(),
                    confidentiality: String::new(),
                },
            }),
            created_at: row.get(8)?,
        })
    }

    /// Visibility/subscription filters run after the SQL query; `limit` is
    /// applied last, after filtering (§4.2). After filtering, raises the
    /// agent's HWM for the conversation's project to the max visibility of
    /// the returned set.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        agent_id: &str,
        opts: GetMessagesOpts,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Err(StoreError::NotFound),
        };
        let conversation =
            Self::query_conversation(&conn, conversation_id)?.ok_or(StoreError::NotFound)?;

        let mut sql = "SELECT id, conversation_id, from_agent, type, visibility, content, agent_metadata, bridge_metadata, created_at
             FROM messages WHERE conversation_id = ?1".to_string();
        if opts.since.is_some() {
            sql.push_str(" AND created_at > ?2");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<Message> = if let Some(ref since) = opts.since {
            stmt.query_map(params![conversation_id, since], Self::row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map(params![conversation_id], Self::row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let unread_ids: std::collections::HashSet<String> = if opts.unread_only {
            let mut stmt = conn.prepare(
                "SELECT m.id FROM messages m
                 LEFT JOIN message_reads r ON r.message_id = m.id AND r.agent_id = ?1
                 WHERE m.conversation_id = ?2 AND r.message_id IS NULL",
            )?;
            stmt.query_map(params![agent_id, conversation_id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            std::collections::HashSet::new()
        };

        let mut filtered: Vec<Message> = rows
            .into_iter()
            .filter(|m| can_see(clearance, m.visibility))
            .filter(|m| !opts.unread_only || unread_ids.contains(&m.id))
            .map(|mut m| {
                // private to the sender
                if m.from_agent != agent_id {
                    m.agent_metadata = None;
                }
                m
            })
            .collect();

        if let Some(limit) = opts.limit {
            filtered.truncate(limit);
        }

        if let Some(max_vis) = filtered.iter().map(|m| m.visibility).max() {
            self.raise_hwm(&conn, agent_id, &conversation.project_id, max_vis)?;
        }

        Ok(filtered)
    }

    fn raise_hwm(
        &self,
        conn: &Connection,
        agent_id: &str,
        project_id: &str,
        candidate: Visibility,
    ) -> Result<(), StoreError> {
        let current: Option<i64> = conn
            .query_row(
                "SELECT max_visibility FROM agent_project_hwm WHERE agent_id = ?1 AND project_id = ?2",
                params![agent_id, project_id],
                |r| r.get(0),
            )
            .ok();
        let current_vis = current.and_then(Visibility::from_i64).unwrap_or(Visibility::Public);
        let raised = raise(current_vis, candidate);
        if current.is_none() || raised != current_vis {
            conn.execute(
                "INSERT INTO agent_project_hwm (agent_id, project_id, max_visibility, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id, project_id) DO UPDATE SET max_visibility = excluded.max_visibility, updated_at = excluded.updated_at",
                params![agent_id, project_id, raised.as_i64(), now()],
            )?;
        }
        Ok(())
    }

    pub fn get_high_water_mark(
        &self,
        agent_id: &str,
        project_id: &str,
    ) -> Result<Option<HighWaterMark>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT max_visibility, updated_at FROM agent_project_hwm WHERE agent_id = ?1 AND project_id = ?2",
                params![agent_id, project_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        Ok(row.map(|(v, updated_at)| HighWaterMark {
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            max_visibility: Visibility::from_i64(v).unwrap_or(Visibility::Public),
            updated_at,
        }))
    }

    pub fn get_unread_count(&self, agent_id: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let clearance = match Self::query_agent(&conn, "id", agent_id)? {
            Some(a) => a.clearance_level,
            None => return Err(StoreError::NotFound),
        };
        let mut stmt = conn.prepare(
            "SELECT m.visibility FROM messages m
             JOIN conversation_agents ca ON ca.conversation_id = m.conversation_id AND ca.agent_id = ?1
             LEFT JOIN message_reads r ON r.message_id = m.id AND r.agent_id = ?1
             WHERE r.message_id IS NULL",
        )?;
        let count = stmt
            .query_map(params![agent_id], |row| row.get::<_, i64>(0))?
            .filter_map(|r| r.ok())
            .filter(|v| Visibility::from_i64(*v).is_some_and(|v| can_see(clearance, v)))
            .count() as i64;
        Ok(count)
    }

    pub fn mark_read(&self, ids: &[String], agent_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let ts = now();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_reads (message_id, agent_id, read_at) VALUES (?1, ?2, ?3)",
            )?;
            for id in ids {
                stmt.execute(params![id, agent_id, ts])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
