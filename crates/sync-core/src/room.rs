use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The local user's relationship to a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Membership {
    Invited,
    Joined,
    Left,
}

/// Emitted when a room's membership status changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipTransition {
    pub room_id: String,
    /// `None` when the room was previously unknown.
    pub old: Option<Membership>,
    pub new: Membership,
    /// Inviter, when the transition came from an invite section.
    pub sender: Option<String>,
    /// Room display name from `invite_state`, when available.
    pub room_name: Option<String>,
}

/// Mutable per-room state, owned exclusively by the reconciler.
///
/// State events follow last-writer-wins per `(event_type, state_key)`.
/// Rooms are never removed: a left room is tombstoned with
/// `Membership::Left` so duplicate leave payloads stay no-ops.
#[derive(Debug, Clone)]
pub struct RoomState {
    membership: Membership,
    state: BTreeMap<(String, String), Value>,
    seen_event_ids: HashSet<String>,
}

impl RoomState {
    pub fn new(membership: Membership) -> Self {
        Self {
            membership,
            state: BTreeMap::new(),
            seen_event_ids: HashSet::new(),
        }
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// Change membership, returning the old status when it actually changed.
    pub fn set_membership(&mut self, new: Membership) -> Option<Membership> {
        if self.membership == new {
            return None;
        }
        let old = self.membership;
        self.membership = new;
        Some(old)
    }

    /// Apply a state event, overwriting any previous value for the same
    /// `(event_type, state_key)` pair.
    pub fn apply_state_event(&mut self, event_type: &str, state_key: &str, content: Value) {
        self.state
            .insert((event_type.to_owned(), state_key.to_owned()), content);
    }

    /// Current value for a `(event_type, state_key)` pair.
    pub fn state_value(&self, event_type: &str, state_key: &str) -> Option<&Value> {
        self.state
            .get(&(event_type.to_owned(), state_key.to_owned()))
    }

    /// Record a timeline event ID. Returns false when it was already seen,
    /// which makes payload replay idempotent.
    pub fn record_event_id(&mut self, event_id: &str) -> bool {
        self.seen_event_ids.insert(event_id.to_owned())
    }

    /// Immutable copy safe to hand to other tasks.
    pub fn snapshot(&self, room_id: &str) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.to_owned(),
            membership: self.membership,
            state: self.state.clone(),
        }
    }
}

/// Read-only copy of a room's reconciled state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub membership: Membership,
    state: BTreeMap<(String, String), Value>,
}

impl RoomSnapshot {
    /// Current value for a `(event_type, state_key)` pair.
    pub fn state_value(&self, event_type: &str, state_key: &str) -> Option<&Value> {
        self.state
            .get(&(event_type.to_owned(), state_key.to_owned()))
    }

    /// Iterate all `(event_type, state_key) -> content` entries.
    pub fn state_entries(&self) -> impl Iterator<Item = (&(String, String), &Value)> {
        self.state.iter()
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }
}
