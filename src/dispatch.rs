//! SSE dispatcher (C9): eligibility and preview-notification construction
//! for `message:created` fan-out.
//!
//! The actual push happens inline in each agent's `GET /mcp` stream
//! (`routes/mcp.rs`), in the teacher's `message_stream` idiom — every open
//! stream is itself a live subscriber filtering the shared broadcast
//! channel, so "batch-fetch subscribers once, push to every active
//! session" falls out structurally: the batch-fetch is the one
//! `list_subscribers` call per stream setup, and every session of an
//! eligible agent is, by construction, its own independent stream.

use crate::models::{Message, Subscription};
use crate::protocol::MessageNotificationParams;
use crate::visibility::{can_see, Visibility};

const PREVIEW_LIMIT: usize = 200;

/// Eligible iff subscribed, not the sender, and cleared to see the
/// message's (already-capped) visibility (§4.9 step 2).
pub fn is_eligible(
    message: &Message,
    subscription: &Subscription,
    recipient_clearance: Visibility,
) -> bool {
    subscription.agent_id != message.from_agent && can_see(recipient_clearance, message.visibility)
}

fn content_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_LIMIT {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(PREVIEW_LIMIT).collect();
        format!("{truncated}…")
    }
}

pub fn preview_notification(message: &Message) -> MessageNotificationParams {
    MessageNotificationParams {
        conversation_id: message.conversation_id.clone(),
        message_id: message.id.clone(),
        from_agent: message.from_agent.clone(),
        message_type: message.message_type.as_str().to_string(),
        visibility: message.visibility.as_str().to_string(),
        content_preview: content_preview(&message.content),
        created_at: message.created_at.clone(),
    }
}
