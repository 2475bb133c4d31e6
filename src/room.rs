//! Room membership and message fan-out.
//!
//! ## Design
//! - RoomStore: Arc<Mutex<HashMap<String, Room>>> — shared across all
//!   connections; the lock is held only for membership mutation and
//!   channel lookup, never across an await point.
//! - Each Room has a broadcast channel (tokio::sync::broadcast) for
//!   real-time fan-out; every session subscribes on join.
//! - Rooms are created lazily on first join and removed from the store
//!   when the last member leaves.
//! - Sender exclusion happens at delivery time via RoomEvent, so a
//!   broadcast to an empty or absent room is a silent no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::{ChatMessage, RoomEvent};

/// Shared room store: room id → Room.
pub type RoomStore = Arc<Mutex<HashMap<String, Room>>>;

/// Broadcast channel capacity per room. A lagged receiver skips the
/// missed messages and continues.
const ROOM_CHANNEL_CAPACITY: usize = 256;

/// A member of a room, as seen by the router.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
}

/// One project's broadcast scope.
pub struct Room {
    pub id: String,
    pub members: Vec<Member>,
    /// Broadcast sender — clone to get a Receiver for a new subscriber.
    pub broadcast_tx: tokio::sync::broadcast::Sender<RoomEvent>,
}

/// Per-session lifecycle. Events are only accepted while `Joined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Closed,
}

impl SessionState {
    /// Transition taken immediately after successful authentication.
    pub fn on_admitted(self) -> SessionState {
        match self {
            SessionState::Connecting => SessionState::Joined,
            other => other,
        }
    }

    /// Transition taken on disconnect; terminal.
    pub fn on_disconnect(self) -> SessionState {
        SessionState::Closed
    }

    pub fn is_joined(self) -> bool {
        self == SessionState::Joined
    }
}

/// Create a new empty RoomStore.
pub fn new_room_store() -> RoomStore {
    Arc::new(Mutex::new(HashMap::new()))
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Add a member to a room, creating the room if this is the first join.
///
/// Returns the member's broadcast receiver. Everything published to the
/// room after this call is observable through it.
pub fn join_room(
    store: &RoomStore,
    room_id: &str,
    member: Member,
) -> tokio::sync::broadcast::Receiver<RoomEvent> {
    let mut guard = match store.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let room = guard.entry(room_id.to_string()).or_insert_with(|| {
        let (tx, _rx) = tokio::sync::broadcast::channel(ROOM_CHANNEL_CAPACITY);
        tracing::debug!(room = room_id, "room created");
        Room {
            id: room_id.to_string(),
            members: Vec::new(),
            broadcast_tx: tx,
        }
    });
    let rx = room.broadcast_tx.subscribe();
    tracing::info!(room = room_id, member = %member.id, email = %member.email, "member joined");
    room.members.push(member);
    rx
}

/// Remove a member from a room. The room itself is dropped from the
/// store once its last member leaves.
pub fn leave_room(store: &RoomStore, room_id: &str, member_id: Uuid) {
    let mut guard = match store.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(room) = guard.get_mut(room_id) {
        room.members.retain(|m| m.id != member_id);
        tracing::info!(room = room_id, member = %member_id, "member left");
        if room.members.is_empty() {
            guard.remove(room_id);
            tracing::debug!(room = room_id, "room emptied");
        }
    }
}

/// Number of members currently in a room (0 if the room does not exist).
pub fn member_count(store: &RoomStore, room_id: &str) -> usize {
    store
        .lock()
        .map(|guard| guard.get(room_id).map(|r| r.members.len()).unwrap_or(0))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

fn publish(store: &RoomStore, room_id: &str, event: RoomEvent) {
    if let Ok(guard) = store.lock() {
        if let Some(room) = guard.get(room_id) {
            // Err here means no live receivers — an empty room is fine.
            let _ = room.broadcast_tx.send(event);
        }
    }
}

/// Relay a peer message to every member of the room except the sender.
/// The message body is passed through verbatim.
pub fn relay_to_peers(store: &RoomStore, room_id: &str, origin: Uuid, msg: ChatMessage) {
    publish(store, room_id, RoomEvent::Human { origin, msg });
}

/// Broadcast an assistant reply to every member of the room, the
/// triggering sender included.
pub fn broadcast_assistant(store: &RoomStore, room_id: &str, text: impl Into<String>) {
    publish(
        store,
        room_id,
        RoomEvent::Assistant {
            msg: ChatMessage::assistant(text),
        },
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn member(email: &str) -> Member {
        Member {
            id: Uuid::new_v4(),
            email: email.to_string(),
        }
    }

    fn chat(sender: &str, message: &str) -> ChatMessage {
        ChatMessage {
            sender: sender.to_string(),
            message: message.to_string(),
        }
    }

    // -- SessionState --------------------------------------------------------

    #[test]
    fn test_state_connecting_to_joined() {
        assert_eq!(
            SessionState::Connecting.on_admitted(),
            SessionState::Joined
        );
    }

    #[test]
    fn test_state_closed_stays_closed_on_admit() {
        assert_eq!(SessionState::Closed.on_admitted(), SessionState::Closed);
    }

    #[test]
    fn test_state_disconnect_is_terminal() {
        assert_eq!(
            SessionState::Joined.on_disconnect(),
            SessionState::Closed
        );
        assert_eq!(
            SessionState::Connecting.on_disconnect(),
            SessionState::Closed
        );
    }

    #[test]
    fn test_state_only_joined_accepts_events() {
        assert!(SessionState::Joined.is_joined());
        assert!(!SessionState::Connecting.is_joined());
        assert!(!SessionState::Closed.is_joined());
    }

    // -- join / leave --------------------------------------------------------

    #[test]
    fn test_join_creates_room_lazily() {
        let store = new_room_store();
        assert_eq!(member_count(&store, "p1"), 0);
        let _rx = join_room(&store, "p1", member("alice@x.com"));
        assert_eq!(member_count(&store, "p1"), 1);
    }

    #[test]
    fn test_join_same_room_twice_accumulates_members() {
        let store = new_room_store();
        let _rx1 = join_room(&store, "p1", member("alice@x.com"));
        let _rx2 = join_room(&store, "p1", member("bob@x.com"));
        assert_eq!(member_count(&store, "p1"), 2);
    }

    #[test]
    fn test_distinct_rooms_are_independent() {
        let store = new_room_store();
        let _rx1 = join_room(&store, "p1", member("alice@x.com"));
        let _rx2 = join_room(&store, "p2", member("bob@x.com"));
        assert_eq!(member_count(&store, "p1"), 1);
        assert_eq!(member_count(&store, "p2"), 1);
    }

    #[test]
    fn test_leave_removes_member() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _rx1 = join_room(&store, "p1", alice);
        let _rx2 = join_room(&store, "p1", member("bob@x.com"));
        leave_room(&store, "p1", alice_id);
        assert_eq!(member_count(&store, "p1"), 1);
    }

    #[test]
    fn test_last_leave_drops_room() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _rx = join_room(&store, "p1", alice);
        leave_room(&store, "p1", alice_id);
        let guard = store.lock().unwrap();
        assert!(!guard.contains_key("p1"));
    }

    #[test]
    fn test_leave_unknown_room_is_noop() {
        let store = new_room_store();
        leave_room(&store, "nope", Uuid::new_v4());
    }

    #[test]
    fn test_leave_unknown_member_keeps_room() {
        let store = new_room_store();
        let _rx = join_room(&store, "p1", member("alice@x.com"));
        leave_room(&store, "p1", Uuid::new_v4());
        assert_eq!(member_count(&store, "p1"), 1);
    }

    // -- relay_to_peers ------------------------------------------------------

    #[test]
    fn test_relay_reaches_subscribers_with_origin() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _alice_rx = join_room(&store, "p1", alice);
        let mut bob_rx = join_room(&store, "p1", member("bob@x.com"));

        relay_to_peers(&store, "p1", alice_id, chat("alice@x.com", "hello"));

        let ev = bob_rx.try_recv().unwrap();
        match &ev {
            RoomEvent::Human { origin, msg } => {
                assert_eq!(*origin, alice_id);
                assert_eq!(msg.message, "hello");
            }
            RoomEvent::Assistant { .. } => panic!("expected a human relay"),
        }
        assert!(!ev.should_deliver_to(alice_id));
    }

    #[test]
    fn test_relay_to_absent_room_is_noop() {
        let store = new_room_store();
        relay_to_peers(&store, "ghost", Uuid::new_v4(), chat("a@x.com", "hi"));
    }

    #[test]
    fn test_relay_passes_message_through_verbatim() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _alice_rx = join_room(&store, "p1", alice);
        let mut bob_rx = join_room(&store, "p1", member("bob@x.com"));

        let original = chat("alice@x.com", "@ai build an express app");
        relay_to_peers(&store, "p1", alice_id, original.clone());

        let ev = bob_rx.try_recv().unwrap();
        assert_eq!(ev.message(), &original);
    }

    #[test]
    fn test_duplicate_sends_produce_two_events() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _alice_rx = join_room(&store, "p1", alice);
        let mut bob_rx = join_room(&store, "p1", member("bob@x.com"));

        relay_to_peers(&store, "p1", alice_id, chat("alice@x.com", "same"));
        relay_to_peers(&store, "p1", alice_id, chat("alice@x.com", "same"));

        assert_eq!(bob_rx.try_recv().unwrap().message().message, "same");
        assert_eq!(bob_rx.try_recv().unwrap().message().message, "same");
        assert!(bob_rx.try_recv().is_err());
    }

    // -- broadcast_assistant -------------------------------------------------

    #[test]
    fn test_assistant_broadcast_reaches_all_members() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let mut alice_rx = join_room(&store, "p1", alice);
        let mut bob_rx = join_room(&store, "p1", member("bob@x.com"));

        broadcast_assistant(&store, "p1", "generated result");

        for rx in [&mut alice_rx, &mut bob_rx] {
            let ev = rx.try_recv().unwrap();
            // The triggering sender is included in assistant delivery.
            assert!(ev.should_deliver_to(alice_id));
            let msg = ev.message();
            assert_eq!(msg.sender, "AI");
            assert_eq!(msg.message, "generated result");
        }
    }

    #[test]
    fn test_assistant_broadcast_to_absent_room_is_noop() {
        let store = new_room_store();
        broadcast_assistant(&store, "ghost", "nobody listens");
    }

    // -- ordering ------------------------------------------------------------

    #[test]
    fn test_relay_precedes_assistant_reply() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _alice_rx = join_room(&store, "p1", alice);
        let mut bob_rx = join_room(&store, "p1", member("bob@x.com"));

        relay_to_peers(&store, "p1", alice_id, chat("alice@x.com", "@ai do it"));
        broadcast_assistant(&store, "p1", "done");

        let first = bob_rx.try_recv().unwrap();
        let second = bob_rx.try_recv().unwrap();
        assert!(matches!(first, RoomEvent::Human { .. }));
        assert!(matches!(second, RoomEvent::Assistant { .. }));
    }

    #[test]
    fn test_late_joiner_misses_earlier_traffic() {
        let store = new_room_store();
        let alice = member("alice@x.com");
        let alice_id = alice.id;
        let _alice_rx = join_room(&store, "p1", alice);

        relay_to_peers(&store, "p1", alice_id, chat("alice@x.com", "early"));

        let mut carol_rx = join_room(&store, "p1", member("carol@x.com"));
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn test_in_flight_reply_still_reaches_remaining_members() {
        let store = new_room_store();
        let mut alice_rx = join_room(&store, "p1", member("alice@x.com"));
        let bob = member("bob@x.com");
        let bob_id = bob.id;
        let bob_rx = join_room(&store, "p1", bob);

        // Bob disconnects while his trigger's reply is still in flight.
        leave_room(&store, "p1", bob_id);
        drop(bob_rx);

        broadcast_assistant(&store, "p1", "late reply");
        let ev = alice_rx.try_recv().unwrap();
        assert_eq!(ev.message().sender, "AI");
        assert_eq!(member_count(&store, "p1"), 1);
    }
}
