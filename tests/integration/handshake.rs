use crate::common::{call_tool, handshake, rpc, test_client, TestAgent};
use rocket::http::Status;

fn code_agent() -> TestAgent {
    TestAgent {
        key: "k-code",
        name: "code",
        agent_type: "assistant",
        clearance: "confidential",
    }
}

#[test]
fn initialize_assigns_session_and_advertises_protocol_version() {
    let client = test_client(&[code_agent()]);
    let (status, body, sid) = rpc(&client, "k-code", None, "initialize", serde_json::json!({}));
    assert_eq!(status, Status::Ok);
    assert!(sid.is_some());
    assert_eq!(
        body["result"]["protocolVersion"],
        agorai_bridge::protocol::MCP_PROTOCOL_VERSION
    );
    assert_eq!(body["result"]["serverInfo"]["name"], "agorai-bridge");
}

#[test]
fn notifications_initialized_is_accepted_with_no_body() {
    let client = test_client(&[code_agent()]);
    let sid = handshake(&client, "k-code");
    let res = client
        .post("/mcp")
        .header(rocket::http::ContentType::JSON)
        .header(rocket::http::Header::new("Authorization", "Bearer k-code"))
        .header(rocket::http::Header::new("mcp-session-id", sid))
        .body(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Accepted);
}

#[test]
fn tools_list_advertises_full_tool_surface() {
    let client = test_client(&[code_agent()]);
    let sid = handshake(&client, "k-code");
    let (status, body, _) = rpc(&client, "k-code", Some(&sid), "tools/list", serde_json::json!({}));
    assert_eq!(status, Status::Ok);
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in [
        "register_agent",
        "list_agents",
        "create_project",
        "list_projects",
        "get_memory",
        "set_memory",
        "delete_memory",
        "create_conversation",
        "list_conversations",
        "subscribe",
        "unsubscribe",
        "list_subscribers",
        "send_message",
        "get_messages",
        "get_status",
        "mark_read",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }
}

#[test]
fn unknown_method_is_method_not_found() {
    let client = test_client(&[code_agent()]);
    let sid = handshake(&client, "k-code");
    let (status, body, _) = rpc(&client, "k-code", Some(&sid), "bogus/method", serde_json::json!({}));
    assert_eq!(status, Status::Ok);
    assert_eq!(body["error"]["code"], -32601);
}

#[test]
fn delete_closes_session_and_subsequent_post_returns_session_not_found() {
    let client = test_client(&[code_agent()]);
    let sid = handshake(&client, "k-code");
    let res = client
        .delete("/mcp")
        .header(rocket::http::Header::new("Authorization", "Bearer k-code"))
        .header(rocket::http::Header::new("mcp-session-id", sid.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let (status, _body, _) = rpc(&client, "k-code", Some(&sid), "tools/list", serde_json::json!({}));
    assert_eq!(status, Status::NotFound);
}

#[test]
fn register_agent_tool_upserts_caller_identity() {
    let client = test_client(&[code_agent()]);
    let sid = handshake(&client, "k-code");
    let result = call_tool(
        &client,
        "k-code",
        &sid,
        "register_agent",
        serde_json::json!({"type": "assistant", "capabilities": ["review"]}),
    )
    .unwrap();
    assert_eq!(result["name"], "code");
    assert_eq!(result["clearanceLevel"], "confidential");
    assert!(result.get("apiKeyHash").is_none());
}
