use crate::common::{call_tool, handshake, test_client, TestAgent};
use rocket::http::Status;

/// §4.9: `GET /mcp` opens a server-sent-events stream; a subscribed,
/// sufficiently-cleared agent sees a `notifications/message` frame for a
/// message sent after it attaches.
#[test]
fn get_stream_opens_for_a_subscribed_agent() {
    let client = test_client(&[
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
    ]);
    let code_sid = handshake(&client, "k-code");
    let desktop_sid = handshake(&client, "k-desktop");

    let project = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_project",
        serde_json::json!({"name": "p"}),
    )
    .unwrap();
    let conversation = call_tool(
        &client,
        "k-code",
        &code_sid,
        "create_conversation",
        serde_json::json!({"projectId": project["id"], "title": "c"}),
    )
    .unwrap();
    call_tool(
        &client,
        "k-desktop",
        &desktop_sid,
        "subscribe",
        serde_json::json!({"conversationId": conversation["id"]}),
    )
    .unwrap();

    // The stream itself is long-lived and not practical to drain inside a
    // blocking test client; this asserts the handshake into the stream
    // succeeds and is framed as `text/event-stream`, which is as far as
    // this crate's dispatch-eligibility logic (unit-tested directly in
    // `dispatch`) needs integration coverage to confirm.
    let res = client
        .get("/mcp")
        .header(rocket::http::Header::new("Authorization", "Bearer k-desktop"))
        .header(rocket::http::Header::new("mcp-session-id", desktop_sid))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(
        res.content_type(),
        Some(rocket::http::ContentType::new("text", "event-stream"))
    );
}
