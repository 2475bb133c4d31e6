//! Realtime collaborative relay for shared projects.
//!
//! ## Design
//! - Each project maps to one broadcast room; sessions are admitted only
//!   after their credential and project membership check out.
//! - Peer messages are relayed verbatim to every other room member; a
//!   message containing the `@ai` trigger additionally invokes the
//!   assistant, whose reply is broadcast to the whole room.
//! - Assistant replies may embed a JSON envelope carrying a generated
//!   file tree that consumer workspaces converge on.

pub mod ai;
pub mod auth;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod room;
pub mod server;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender name used for assistant-originated messages on the wire.
pub const AI_SENDER: &str = "AI";

/// The literal substring that marks a message as requesting assistant
/// generation. Matched ASCII case-insensitively, anywhere in the message.
pub const AI_TRIGGER: &str = "@ai";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A chat message as it appears on the wire: who said it, and what.
///
/// Ephemeral — the relay never persists messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
}

impl ChatMessage {
    /// Construct an assistant-originated message.
    pub fn assistant(message: impl Into<String>) -> Self {
        ChatMessage {
            sender: AI_SENDER.to_string(),
            message: message.into(),
        }
    }
}

/// A framed event on the socket. Serializes as
/// `{"type": "project-message", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Frame {
    ProjectMessage(ChatMessage),
}

/// An event carried on a room's broadcast channel.
///
/// Human messages record their origin so the delivery pump can exclude
/// the sender; assistant messages go to every member. Dispatch is on the
/// variant, never on the sender string.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Human { origin: Uuid, msg: ChatMessage },
    Assistant { msg: ChatMessage },
}

impl RoomEvent {
    /// Whether this event should be delivered to the given member.
    pub fn should_deliver_to(&self, member: Uuid) -> bool {
        match self {
            RoomEvent::Human { origin, .. } => *origin != member,
            RoomEvent::Assistant { .. } => true,
        }
    }

    /// The wire message this event carries.
    pub fn message(&self) -> &ChatMessage {
        match self {
            RoomEvent::Human { msg, .. } | RoomEvent::Assistant { msg } => msg,
        }
    }

    pub fn into_message(self) -> ChatMessage {
        match self {
            RoomEvent::Human { msg, .. } | RoomEvent::Assistant { msg } => msg,
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger detection
// ---------------------------------------------------------------------------

/// Byte offset of the first `@ai` occurrence, ASCII case-insensitive.
pub fn find_trigger(message: &str) -> Option<usize> {
    let needle = AI_TRIGGER.as_bytes();
    message
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Derive the assistant prompt from a triggering message: the first
/// trigger occurrence is removed (exactly once) and the remainder is
/// whitespace-trimmed. Returns `None` when no trigger is present.
pub fn strip_trigger(message: &str) -> Option<String> {
    let at = find_trigger(message)?;
    let mut out = String::with_capacity(message.len() - AI_TRIGGER.len());
    out.push_str(&message[..at]);
    out.push_str(&message[at + AI_TRIGGER.len()..]);
    Some(out.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
