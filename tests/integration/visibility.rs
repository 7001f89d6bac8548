use crate::common::{call_tool, handshake, test_client, TestAgent};

fn agents() -> Vec<TestAgent> {
    vec![
        TestAgent {
            key: "k-public",
            name: "pub-agent",
            agent_type: "assistant",
            clearance: "public",
        },
        TestAgent {
            key: "k-team",
            name: "team-agent",
            agent_type: "assistant",
            clearance: "team",
        },
    ]
}

/// §8 "visibility cap at send-time": a sender requesting a visibility above
/// their own clearance is capped, and `bridgeMetadata` records the cap.
#[test]
fn send_message_caps_visibility_to_sender_clearance() {
    let client = test_client(&agents());
    let sid = handshake(&client, "k-public");

    let project = call_tool(
        &client,
        "k-public",
        &sid,
        "create_project",
        serde_json::json!({"name": "capped", "visibility": "public"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-public",
        &sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap();

    let sent = call_tool(
        &client,
        "k-public",
        &sid,
        "send_message",
        serde_json::json!({
            "conversationId": conversation["id"],
            "content": "trying to go restricted",
            "visibility": "restricted",
        }),
    )
    .unwrap();

    assert_eq!(sent["visibility"], "public");
    assert_eq!(sent["bridgeMetadata"]["visibilityCapped"], true);
    assert_eq!(sent["bridgeMetadata"]["originalVisibility"], "restricted");
    assert_eq!(sent["bridgeMetadata"]["senderClearance"], "public");
}

/// A clearance-matching send is never marked as capped.
#[test]
fn send_message_at_clearance_is_not_capped() {
    let client = test_client(&agents());
    let sid = handshake(&client, "k-team");
    let project = call_tool(
        &client,
        "k-team",
        &sid,
        "create_project",
        serde_json::json!({"name": "p"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-team",
        &sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap();
    let sent = call_tool(
        &client,
        "k-team",
        &sid,
        "send_message",
        serde_json::json!({"conversationId": conversation["id"], "content": "hi", "visibility": "team"}),
    )
    .unwrap();
    assert_eq!(sent["bridgeMetadata"]["visibilityCapped"], false);
    assert!(sent["bridgeMetadata"].get("originalVisibility").is_none());
}

/// A subscriber cleared below a message's visibility never sees it, even
/// though they're subscribed to the conversation.
#[test]
fn subscriber_below_message_visibility_cannot_read_it() {
    let client = test_client(&agents());
    let public_sid = handshake(&client, "k-public");
    let team_sid = handshake(&client, "k-team");

    let project = call_tool(
        &client,
        "k-team",
        &team_sid,
        "create_project",
        serde_json::json!({"name": "p", "visibility": "public"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-team",
        &team_sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-public",
        &public_sid,
        "subscribe",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-team",
        &team_sid,
        "send_message",
        serde_json::json!({"conversationId": conversation["id"], "content": "team only", "visibility": "team"}),
    )
    .unwrap();

    let messages = call_tool(
        &client,
        "k-public",
        &public_sid,
        "get_messages",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap();
    assert_eq!(messages.as_array().unwrap().len(), 0);
}
