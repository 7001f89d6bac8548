//! Internal agent runner (C10): a cooperative worker loop that polls
//! conversations, reacts to bus events, builds a bounded context window,
//! invokes an external model, and commits its reply with at-least-once
//! "mark-read only after successful send" discipline (§4.10).
//!
//! Grounded in the teacher's background-task idiom: `webhooks.rs`'s
//! `tokio::spawn`ed dispatcher loop and `retention.rs`'s periodic sweep,
//! generalized into a longer-lived cooperative loop with its own
//! cancellation channel (§5 "Cancellation").

use crate::db::Db;
use crate::events::BusEvent;
use crate::models::{
    CreateConversationInput, GetMessagesOpts, HistoryAccess, MessageType, RegisterAgentInput,
    SendMessageInput,
};
use crate::visibility::Visibility;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    Passive,
    Active,
}

/// The abstract contract for a model-calling adapter (§1 "Out of scope" —
/// only this contract matters here; CLI subprocess / chat-completion HTTP
/// clients are external collaborators).
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, String>;
}

/// A minimal concrete adapter over an OpenAI-style chat-completions HTTP
/// endpoint, using the teacher's `reqwest` dependency — enough to exercise
/// the runner end-to-end without inventing a full adapter hierarchy the
/// spec explicitly places out of scope.
pub struct HttpChatAdapter {
    pub endpoint: String,
    pub model: String,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl ModelAdapter for HttpChatAdapter {
    async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, String> {
        let mut messages = Vec::new();
        if let Some(sp) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": sp}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({"model": self.model, "messages": messages}))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "adapter response missing choices[0].message.content".to_string())
    }
}

pub struct RunnerConfig {
    pub agent_name: String,
    pub mode: RunnerMode,
    pub poll_interval_ms: u64,
    pub system_prompt: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            agent_name: "internal-runner".to_string(),
            mode: RunnerMode::Active,
            poll_interval_ms: 3000,
            system_prompt: None,
        }
    }
}

pub struct AgentRunner {
    db: Arc<Db>,
    adapter: Arc<dyn ModelAdapter>,
    config: RunnerConfig,
    agent_id: Mutex<Option<String>>,
    tracked: Mutex<HashSet<String>>,
    pending: Arc<Mutex<HashSet<String>>>,
    cancel: tokio::sync::watch::Receiver<bool>,
}

/// Case-insensitive `@<name>` mention, name re-escaped so an agent name
/// containing regex metacharacters can't corrupt the pattern (§4.10 step 3).
fn mention_pattern(name: &str) -> Regex {
    let escaped = regex::escape(name);
    Regex::new(&format!(r"(?i)@{escaped}\b")).expect("escaped pattern is always valid")
}

impl AgentRunner {
    pub fn new(
        db: Arc<Db>,
        adapter: Arc<dyn ModelAdapter>,
        config: RunnerConfig,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            adapter,
            config,
            agent_id: Mutex::new(None),
            tracked: Mutex::new(HashSet::new()),
            pending: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Registers as an agent with synthetic `apiKeyHash = "internal:<name>"`
    /// and default clearance `team`; installs a bus listener that adds a
    /// message's conversation to `pending` whenever `fromAgent != myId`
    /// (§4.10 "Startup").
    pub fn start(self: Arc<Self>) -> Result<(), crate::error::StoreError> {
        let agent = self.db.register_agent(RegisterAgentInput {
            name: self.config.agent_name.clone(),
            agent_type: "internal".to_string(),
            capabilities: vec![],
            clearance_level: Some(Visibility::Team),
            api_key_hash: Some(format!("internal:{}", self.config.agent_name)),
        })?;
        *self.agent_id.lock().unwrap() = Some(agent.id.clone());

        let mut bus_rx = self.db.subscribe_events();
        let my_id = agent.id.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(BusEvent::MessageCreated(m)) => {
                        if m.from_agent != my_id {
                            pending.lock().unwrap().insert(m.conversation_id.clone());
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "internal runner bus receiver lagged");
                    }
                }
            }
        });

        let runner = self.clone();
        tokio::spawn(async move { runner.run_loop().await });
        Ok(())
    }

    fn agent_id(&self) -> String {
        self.agent_id.lock().unwrap().clone().expect("start() must run before run_loop")
    }

    /// §4.10 "Loop": heartbeat, discover, drain pending, full sweep,
    /// interruptible sleep, until cancelled.
    async fn run_loop(self: Arc<Self>) {
        let mut cancel = self.cancel.clone();
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            if *cancel.borrow() {
                return;
            }

            if last_heartbeat.elapsed() >= Duration::from_secs(30) {
                tracing::debug!(agent = %self.config.agent_name, "internal runner heartbeat");
                last_heartbeat = tokio::time::Instant::now();
            }

            if let Err(e) = self.db.update_agent_last_seen(&self.agent_id()) {
                tracing::error!(error = %e, "internal runner failed to update last_seen");
            }

            self.discover();

            let drained: Vec<String> = {
                let mut pending = self.pending.lock().unwrap();
                pending.drain().collect()
            };
            let tracked_snapshot: HashSet<String> = self.tracked.lock().unwrap().clone();
            for conv_id in drained {
                if tracked_snapshot.contains(&conv_id) {
                    self.process_conversation(&conv_id).await;
                }
            }

            let sweep: Vec<String> = self.tracked.lock().unwrap().iter().cloned().collect();
            for conv_id in sweep {
                self.process_conversation(&conv_id).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Lists projects for `me`, then conversations per project, subscribing
    /// to and tracking any not seen before (§4.10 "Discover").
    fn discover(&self) {
        let agent_id = self.agent_id();
        let projects = match self.db.list_projects(&agent_id) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "internal runner failed to list projects");
                return;
            }
        };
        for project in projects {
            let conversations = match self.db.list_conversations(&project.id, &agent_id) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "internal runner failed to list conversations");
                    continue;
                }
            };
            for conv in conversations {
                let already_tracked = self.tracked.lock().unwrap().contains(&conv.id);
                if !already_tracked {
                    if let Err(e) = self.db.subscribe(&conv.id, &agent_id, HistoryAccess::Full) {
                        tracing::error!(error = %e, "internal runner failed to subscribe");
                        continue;
                    }
                    self.tracked.lock().unwrap().insert(conv.id);
                }
            }
        }
    }

    /// Lets the runner take part in a conversation nobody has discovered
    /// yet via `discover()` — e.g. one it creates itself in a future
    /// extension. Exposed for tests exercising `process_conversation`
    /// directly.
    #[cfg(test)]
    fn track(&self, conversation_id: &str) {
        self.tracked.lock().unwrap().insert(conversation_id.to_string());
    }

    async fn process_conversation(&self, conversation_id: &str) {
        let agent_id = self.agent_id();

        let unread = match self.db.get_messages(
            conversation_id,
            &agent_id,
            GetMessagesOpts {
                since: None,
                unread_only: true,
                limit: Some(20),
            },
        ) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "internal runner failed to fetch unread");
                return;
            }
        };
        if unread.is_empty() {
            return;
        }

        let others: Vec<_> = unread.iter().filter(|m| m.from_agent != agent_id).collect();
        let unread_ids: Vec<String> = unread.iter().map(|m| m.id.clone()).collect();
        if others.is_empty() {
            let _ = self.db.mark_read(&unread_ids, &agent_id);
            return;
        }

        if self.config.mode == RunnerMode::Passive {
            let pattern = mention_pattern(&self.config.agent_name);
            let mentioned = others.iter().any(|m| pattern.is_match(&m.content));
            if !mentioned {
                let _ = self.db.mark_read(&unread_ids, &agent_id);
                return;
            }
        }

        let context = match self.db.get_messages(
            conversation_id,
            &agent_id,
            GetMessagesOpts {
                since: None,
                unread_only: false,
                limit: Some(20),
            },
        ) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "internal runner failed to build context");
                return;
            }
        };

        let mut name_cache: HashMap<String, String> = HashMap::new();
        let mut rendered = Vec::with_capacity(context.len());
        for m in &context {
            let sender = if m.from_agent == agent_id {
                "you".to_string()
            } else if let Some(cached) = name_cache.get(&m.from_agent) {
                cached.clone()
            } else {
                let name = self
                    .db
                    .get_agent_by_id(&m.from_agent)
                    .ok()
                    .flatten()
                    .map(|a| a.name)
                    .unwrap_or_else(|| m.from_agent.clone());
                name_cache.insert(m.from_agent.clone(), name.clone());
                name
            };
            rendered.push(format!("[{sender}]: {}", m.content));
        }
        let prompt = rendered.join("\n\n");

        match self
            .adapter
            .complete(&prompt, self.config.system_prompt.as_deref())
            .await
        {
            Ok(reply) => {
                let sent = self.db.send_message(
                    SendMessageInput {
                        conversation_id: conversation_id.to_string(),
                        message_type: Some(MessageType::Message),
                        visibility: None,
                        content: reply,
                        metadata: None,
                    },
                    &agent_id,
                );
                match sent {
                    Ok(_) => {
                        // Only mark read after a successful send — at-least-once
                        // delivery; a later mark-read failure just retries the
                        // reply next round (§4.10 step 5).
                        let _ = self.db.mark_read(&unread_ids, &agent_id);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "internal runner failed to send reply");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "internal runner adapter call failed, will retry");
            }
        }
    }

    /// Convenience used by `routes` to seed a conversation for the runner,
    /// mirroring how an operator might bootstrap a dedicated project.
    pub fn bootstrap_conversation(
        &self,
        project_id: &str,
        title: &str,
    ) -> Result<(), crate::error::StoreError> {
        let agent_id = self.agent_id();
        let conv = self.db.create_conversation(
            CreateConversationInput {
                project_id: project_id.to_string(),
                title: title.to_string(),
                default_visibility: None,
            },
            &agent_id,
        )?;
        self.db.subscribe(&conv.id, &agent_id, HistoryAccess::Full)?;
        self.tracked.lock().unwrap().insert(conv.id);
        Ok(())
    }
}
