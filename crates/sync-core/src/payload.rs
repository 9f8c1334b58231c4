use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level `/sync` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResponse {
    /// Cursor to supply as `since` on the next poll.
    pub next_batch: String,
    /// Per-room event sections, keyed by membership class.
    #[serde(default)]
    pub rooms: RoomsSection,
}

impl SyncResponse {
    /// Whether this payload carries no room data (a long-poll timeout
    /// that expired with nothing new).
    pub fn is_empty(&self) -> bool {
        self.rooms.invite.is_empty() && self.rooms.join.is_empty() && self.rooms.leave.is_empty()
    }
}

/// The `rooms.{invite,join,leave}` mappings from room ID to room section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoomsSection {
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoomSection>,
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoomSection>,
    #[serde(default)]
    pub leave: BTreeMap<String, LeftRoomSection>,
}

/// Section for a room the local user has been invited to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InvitedRoomSection {
    #[serde(default)]
    pub invite_state: StateSection,
}

/// Section for a joined room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JoinedRoomSection {
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub timeline: TimelineSection,
    #[serde(default)]
    pub ephemeral: EphemeralSection,
}

/// Section for a room the local user has left or been removed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LeftRoomSection {
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub timeline: TimelineSection,
}

/// A bundle of state events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StateSection {
    #[serde(default)]
    pub events: Vec<RawSyncEvent>,
}

/// A bundle of timeline events plus pagination metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimelineSection {
    #[serde(default)]
    pub events: Vec<RawSyncEvent>,
    /// True when the server truncated the timeline gap.
    #[serde(default)]
    pub limited: bool,
    /// Token for paginating backwards before this chunk.
    #[serde(default)]
    pub prev_batch: Option<String>,
}

/// A bundle of ephemeral (non-persisted) events such as typing notices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EphemeralSection {
    #[serde(default)]
    pub events: Vec<RawSyncEvent>,
}

/// A single event as it appears on the wire.
///
/// Fields the protocol requires are still optional here: validation happens
/// during reconciliation so one malformed event never poisons a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawSyncEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// Present on state events only; distinguishes them from timeline events.
    #[serde(default)]
    pub state_key: Option<String>,
    /// Opaque structured payload.
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub origin_server_ts: Option<u64>,
}

impl RawSyncEvent {
    pub fn is_state_event(&self) -> bool {
        self.state_key.is_some()
    }
}

/// The standard Matrix error body carried by non-200 responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatrixErrorBody {
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}
