use crate::common::{call_tool, handshake, test_client, TestAgent};

fn agents() -> Vec<TestAgent> {
    vec![TestAgent {
        key: "k-code",
        name: "code",
        agent_type: "assistant",
        clearance: "confidential",
    }]
}

/// §8 HWM monotonicity: reading a higher-visibility message raises the
/// per-project high-water mark; a later read of a lower-visibility message
/// never lowers it back down.
#[test]
fn high_water_mark_only_ever_rises() {
    let client = test_client(&agents());
    let sid = handshake(&client, "k-code");

    let project = call_tool(
        &client,
        "k-code",
        &sid,
        "create_project",
        serde_json::json!({"name": "p", "visibility": "confidential"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-code",
        &sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap();

    call_tool(
        &client,
        "k-code",
        &sid,
        "send_message",
        serde_json::json!({"conversationId": conversation["id"], "content": "low", "visibility": "public"}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-code",
        &sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap();
    let status = call_tool(
        &client,
        "k-code",
        &sid,
        "get_status",
        serde_json::json!({"projectId": project["id"]}),
    )
    .unwrap();
    assert_eq!(status["highWaterMark"]["maxVisibility"], "public");

    call_tool(
        &client,
        "k-code",
        &sid,
        "send_message",
        serde_json::json!({"conversationId": conversation["id"], "content": "high", "visibility": "confidential"}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-code",
        &sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap();
    let status = call_tool(
        &client,
        "k-code",
        &sid,
        "get_status",
        serde_json::json!({"projectId": project["id"]}),
    )
    .unwrap();
    assert_eq!(status["highWaterMark"]["maxVisibility"], "confidential");

    // A subsequent read of the same (now mixed) history must not lower it.
    call_tool(
        &client,
        "k-code",
        &sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation["id"], "since": "1970-01-01T00:00:00Z"}),
    )
    .unwrap();
    let status = call_tool(
        &client,
        "k-code",
        &sid,
        "get_status",
        serde_json::json!({"projectId": project["id"]}),
    )
    .unwrap();
    assert_eq!(status["highWaterMark"]["maxVisibility"], "confidential");
}
