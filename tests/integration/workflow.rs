use crate::common::{call_tool, handshake, test_client, TestAgent};

fn agents() -> Vec<TestAgent> {
    vec![
        TestAgent {
            key: "k-code",
            name: "code",
            agent_type: "assistant",
            clearance: "confidential",
        },
        TestAgent {
            key: "k-desktop",
            name: "desktop",
            agent_type: "assistant",
            clearance: "team",
        },
    ]
}

/// §8 "full workflow": register, create a project, create a conversation,
/// subscribe, send, and read it back.
#[test]
fn full_workflow_round_trips_a_message() {
    let client = test_client(&agents());
    let code_sid = handshake(&client, "k-code");
    let desktop_sid = handshake(&client, "k-desktop");

    call_tool(
        &client,
        "k-code",
        &code_sid,
        "register_agent",
        serde_json::json!({"type": "assistant"}),
    )
    .unwrap();

    let project = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_project",
        serde_json::json!({"name": "agorai", "visibility": "team"}),
    )
    .unwrap();
    let project_id = project["id"].as_str().unwrap();

    let conversation = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_conversation",
        serde_json::json!({"projectId": project_id, "title": "kickoff"}),
    )
    .unwrap();
    let conversation_id = conversation["id"].as_str().unwrap();

    call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "subscribe",
        serde_json::json!({"conversationId": conversation_id}),
    )
    .unwrap();

    let sent = call_tool(
        &client,
        "k-code",
        &code_sid,
        "send_message",
        serde_json::json!({"conversationId": conversation_id, "content": "let's build this"}),
    )
    .unwrap();
    assert_eq!(sent["fromAgent"], "code");
    assert_eq!(sent["visibility"], "team");

    let messages = call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation_id}),
    )
    .unwrap();
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "let's build this");

    let marked = call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "mark_read",
        serde_json::json!({"conversationId": conversation_id}),
    )
    .unwrap();
    assert_eq!(marked["marked"], 1);

    let status = call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "get_status",
        serde_json::json!({"projectId": project_id}),
    )
    .unwrap();
    assert_eq!(status["unreadCount"], 0);
}

/// §8 "public-only isolation": an agent never subscribed to a conversation
/// cannot read any of its messages, even public ones.
#[test]
fn non_subscriber_cannot_read_conversation_messages() {
    let client = test_client(&agents());
    let code_sid = handshake(&client, "k-code");
    let desktop_sid = handshake(&client, "k-desktop");

    let project = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_project",
        serde_json::json!({"name": "isolated"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "private"}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-code",
        &code_sid,
        "send_message",
        serde_json::json!({
            "conversationId": conversation["id"],
            "content": "public note",
            "visibility": "public",
        }),
    )
    .unwrap();

    let err = call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap_err();
    assert_eq!(err["message"], "Not found or access denied");
}
