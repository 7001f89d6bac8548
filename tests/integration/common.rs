use agorai_bridge::config::BridgeConfig;
use rocket::local::blocking::Client;

/// Wrapper around `Client` that auto-deletes the ephemeral SQLite file and
/// agent-key table on drop. Each test gets its own `/tmp/agorai_test_<uuid>.db`
/// to avoid contention between parallel test threads.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
    agents_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_file(&self.agents_path);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

/// One bearer-token agent-key record to seed into the ephemeral agents file.
pub struct TestAgent {
    pub key: &'static str,
    pub name: &'static str,
    pub agent_type: &'static str,
    pub clearance: &'static str,
}

fn unique_path(prefix: &str, suffix: &str) -> String {
    format!(
        "/tmp/{prefix}_{}{suffix}",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

/// Builds a rocket instance backed by an ephemeral database and an agents
/// file seeded with the given key records.
pub fn test_client(agents: &[TestAgent]) -> TestClient {
    let db_path = unique_path("agorai_test", ".db");
    let agents_path = unique_path("agorai_agents", ".json");

    let records: Vec<serde_json::Value> = agents
        .iter()
        .map(|a| {
            serde_json::json!({
                "key": a.key,
                "agent": a.name,
                "type": a.agent_type,
                "capabilities": [],
                "clearanceLevel": a.clearance,
            })
        })
        .collect();
    std::fs::write(&agents_path, serde_json::to_string(&records).unwrap()).unwrap();

    let config = BridgeConfig {
        database_path: db_path.clone(),
        max_body_size: 64 * 1024,
        key_salt: None,
        agents_file: Some(agents_path.clone()),
        poll_interval_ms: 100,
    };

    let rocket = agorai_bridge::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
        agents_path,
    }
}

/// Sends a JSON-RPC request over `POST /mcp` with the given bearer token and
/// optional session id, returning the response and any `mcp-session-id`
/// header it carries back.
pub fn rpc(
    client: &Client,
    token: &str,
    session_id: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> (rocket::http::Status, serde_json::Value, Option<String>) {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let mut req = client
        .post("/mcp")
        .header(rocket::http::ContentType::JSON)
        .header(rocket::http::Header::new(
            "Authorization",
            format!("Bearer {token}"),
        ))
        .body(body.to_string());
    if let Some(sid) = session_id {
        req = req.header(rocket::http::Header::new("mcp-session-id", sid.to_string()));
    }
    let res = req.dispatch();
    let status = res.status();
    let returned_sid = res
        .headers()
        .get_one("mcp-session-id")
        .map(|s| s.to_string());
    let json = res.into_json().unwrap_or(serde_json::Value::Null);
    (status, json, returned_sid)
}

/// Performs `initialize` and returns the session id the server assigned.
pub fn handshake(client: &Client, token: &str) -> String {
    let (status, _body, sid) = rpc(client, token, None, "initialize", serde_json::json!({}));
    assert_eq!(status, rocket::http::Status::Ok);
    sid.expect("initialize must mint a session id")
}

/// Calls a tool via `tools/call` and returns the parsed result value, the
/// tool's text payload decoded as JSON.
pub fn call_tool(
    client: &Client,
    token: &str,
    session_id: &str,
    tool: &str,
    args: serde_json::Value,
) -> Result<serde_json::Value, serde_json::Value> {
    let (status, body, _) = rpc(
        client,
        token,
        Some(session_id),
        "tools/call",
        serde_json::json!({ "name": tool, "arguments": args }),
    );
    assert_eq!(status, rocket::http::Status::Ok);
    if let Some(error) = body.get("error") {
        return Err(error.clone());
    }
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    Ok(serde_json::from_str(text).unwrap())
}
