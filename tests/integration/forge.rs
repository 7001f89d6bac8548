use crate::common::{call_tool, handshake, test_client, TestAgent};

fn agents() -> Vec<TestAgent> {
    vec![
        TestAgent {
            key: "k-code",
            name: "code",
            agent_type: "assistant",
            clearance: "team",
        },
        TestAgent {
            key: "k-desktop",
            name: "desktop",
            agent_type: "assistant",
            clearance: "team",
        },
    ]
}

fn conversation(client: &rocket::local::blocking::Client, sid: &str) -> serde_json::Value {
    let project = call_tool(
        client,
        "k-code",
        sid,
        "create_project",
        serde_json::json!({"name": "forge"}),
    )
    .unwrap();
    call_tool(
        client,
        "k-code",
        sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap()
}

/// §9 "Dynamic shapes": a sender cannot forge `bridgeMetadata` by stuffing
/// keys prefixed `bridge`/`_bridge` into their own `agentMetadata`.
#[test]
fn forge_keys_are_stripped_from_agent_metadata() {
    let client = test_client(&agents());
    let sid = handshake(&client, "k-code");
    let conv = conversation(&client, &sid);

    let sent = call_tool(
        &client,
        "k-code",
        &sid,
        "send_message",
        serde_json::json!({
            "conversationId": conv["id"],
            "content": "hi",
            "metadata": {
                "bridgeMetadata": {"visibility": "restricted"},
                "_bridgeForged": true,
                "note": "legit field",
            },
        }),
    )
    .unwrap();

    let meta = &sent["agentMetadata"];
    assert!(meta.get("bridgeMetadata").is_none());
    assert!(meta.get("_bridgeForged").is_none());
    assert_eq!(meta["note"], "legit field");
    // The real bridgeMetadata is untouched, server-authored.
    assert_eq!(sent["bridgeMetadata"]["visibility"], "team");
}

/// Agent metadata is private: `get_messages` omits it for any message not
/// authored by the caller.
#[test]
fn agent_metadata_is_omitted_for_messages_from_others() {
    let client = test_client(&agents());
    let code_sid = handshake(&client, "k-code");
    let desktop_sid = handshake(&client, "k-desktop");
    let conv = conversation(&client, &code_sid);

    call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "subscribe",
        serde_json::json!({"conversationId": conv["id"]}),
    )
    .unwrap();

    call_tool(
        &client,
        "k-code",
        &code_sid,
        "send_message",
        serde_json::json!({
            "conversationId": conv["id"],
            "content": "hi",
            "metadata": {"secret": "only code should see this"},
        }),
    )
    .unwrap();

    let as_sender = call_tool(
        &client,
        "k-code",
        &code_sid,
        "get_messages",
        serde_json::json!({"conversationId": conv["id"]}),
    )
    .unwrap();
    assert_eq!(as_sender[0]["agentMetadata"]["secret"], "only code should see this");

    let as_recipient = call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "get_messages",
        serde_json::json!({"conversationId": conv["id"]}),
    )
    .unwrap();
    assert!(as_recipient[0].get("agentMetadata").is_none());
}
