use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::payload::{RawSyncEvent, SyncResponse, TimelineSection};
use crate::room::{Membership, MembershipTransition, RoomSnapshot, RoomState};

/// An immutable timeline event, normalized from the wire format.
///
/// Ordering within a room is the server-delivered order; no ordering is
/// defined across rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub room_id: String,
    /// Unique within a room.
    pub event_id: String,
    pub sender: String,
    pub event_type: String,
    /// Opaque structured payload.
    pub content: Value,
    pub origin_server_ts: u64,
}

/// An ephemeral per-room event (e.g. `m.typing`). Never stored in room state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EphemeralEvent {
    pub room_id: String,
    pub event_type: String,
    pub content: Value,
}

/// A single reconciled update, in delivery order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncUpdate {
    Timeline(TimelineEvent),
    Membership(MembershipTransition),
    Ephemeral(EphemeralEvent),
}

/// Diagnostic counters recorded while reconciling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Events skipped because a required field was missing.
    pub malformed_events: u64,
    /// Timeline events skipped because their ID was already seen.
    pub duplicate_events: u64,
}

/// Merges `/sync` payloads into per-room state and produces the ordered
/// update stream.
///
/// Room sections are processed in invited, joined, left order so an invite
/// is visible before the join or leave that follows it. Replaying an
/// already-processed payload is a no-op: duplicate timeline events are
/// suppressed by ID and unchanged membership emits no transition.
#[derive(Debug, Default)]
pub struct Reconciler {
    rooms: HashMap<String, RoomState>,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one payload, returning updates in arrival order.
    ///
    /// Reconciliation is total: malformed rooms and events are skipped and
    /// counted in [`ReconcileStats`], never surfaced as errors, so a payload
    /// that made it past body parsing always reconciles to completion.
    ///
    /// With `deliver_events == false` timeline and ephemeral events are
    /// absorbed into state without being returned; membership transitions
    /// are always returned. This backs the initial-sync fast-forward mode.
    pub fn reconcile(&mut self, payload: &SyncResponse, deliver_events: bool) -> Vec<SyncUpdate> {
        let mut updates = Vec::new();

        for (room_id, section) in &payload.rooms.invite {
            if room_id.is_empty() {
                self.note_malformed("invite section with empty room id");
                continue;
            }
            if let Some(mut transition) = self.transition_to(room_id, Membership::Invited) {
                enrich_invite_transition(&mut transition, &section.invite_state.events);
                updates.push(SyncUpdate::Membership(transition));
            }
            self.apply_state_events(room_id, &section.invite_state.events);
        }

        for (room_id, section) in &payload.rooms.join {
            if room_id.is_empty() {
                self.note_malformed("join section with empty room id");
                continue;
            }
            if let Some(transition) = self.transition_to(room_id, Membership::Joined) {
                updates.push(SyncUpdate::Membership(transition));
            }
            self.apply_state_events(room_id, &section.state.events);
            self.apply_timeline(room_id, &section.timeline, deliver_events, &mut updates);
            if deliver_events {
                self.collect_ephemeral(room_id, &section.ephemeral.events, &mut updates);
            }
        }

        for (room_id, section) in &payload.rooms.leave {
            if room_id.is_empty() {
                self.note_malformed("leave section with empty room id");
                continue;
            }
            if let Some(transition) = self.transition_to(room_id, Membership::Left) {
                updates.push(SyncUpdate::Membership(transition));
            }
            self.apply_state_events(room_id, &section.state.events);
            self.apply_timeline(room_id, &section.timeline, deliver_events, &mut updates);
        }

        updates
    }

    /// All rooms seen so far, tombstoned ones included.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Read-only copy of one room's state.
    pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(|room| room.snapshot(room_id))
    }

    /// Read-only copies of every room's state.
    pub fn snapshots(&self) -> Vec<RoomSnapshot> {
        let mut all: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|(room_id, room)| room.snapshot(room_id))
            .collect();
        all.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        all
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Move a room to `new` membership, creating it if unknown. Returns a
    /// transition only when the status actually changed.
    fn transition_to(&mut self, room_id: &str, new: Membership) -> Option<MembershipTransition> {
        match self.rooms.get_mut(room_id) {
            Some(room) => room.set_membership(new).map(|old| MembershipTransition {
                room_id: room_id.to_owned(),
                old: Some(old),
                new,
                sender: None,
                room_name: None,
            }),
            None => {
                self.rooms
                    .insert(room_id.to_owned(), RoomState::new(new));
                Some(MembershipTransition {
                    room_id: room_id.to_owned(),
                    old: None,
                    new,
                    sender: None,
                    room_name: None,
                })
            }
        }
    }

    fn apply_state_events(&mut self, room_id: &str, events: &[RawSyncEvent]) {
        for event in events {
            let Some(event_type) = event.event_type.as_deref() else {
                self.note_malformed("state event without type");
                continue;
            };
            let Some(state_key) = event.state_key.as_deref() else {
                self.note_malformed("state event without state_key");
                continue;
            };
            if let Some(room) = self.rooms.get_mut(room_id) {
                room.apply_state_event(event_type, state_key, event.content.clone());
            }
        }
    }

    fn apply_timeline(
        &mut self,
        room_id: &str,
        timeline: &TimelineSection,
        deliver_events: bool,
        updates: &mut Vec<SyncUpdate>,
    ) {
        for event in &timeline.events {
            let (Some(event_id), Some(sender), Some(event_type)) = (
                event.event_id.as_deref(),
                event.sender.as_deref(),
                event.event_type.as_deref(),
            ) else {
                self.note_malformed("timeline event missing id, sender, or type");
                continue;
            };

            let Some(room) = self.rooms.get_mut(room_id) else {
                continue;
            };

            if !room.record_event_id(event_id) {
                self.stats.duplicate_events += 1;
                continue;
            }

            // State changes delivered through the timeline still update the
            // state map, keeping last-writer-wins across payloads.
            if let Some(state_key) = event.state_key.as_deref() {
                room.apply_state_event(event_type, state_key, event.content.clone());
            }

            if deliver_events {
                updates.push(SyncUpdate::Timeline(TimelineEvent {
                    room_id: room_id.to_owned(),
                    event_id: event_id.to_owned(),
                    sender: sender.to_owned(),
                    event_type: event_type.to_owned(),
                    content: event.content.clone(),
                    origin_server_ts: event.origin_server_ts.unwrap_or(0),
                }));
            }
        }
    }

    fn collect_ephemeral(
        &mut self,
        room_id: &str,
        events: &[RawSyncEvent],
        updates: &mut Vec<SyncUpdate>,
    ) {
        for event in events {
            let Some(event_type) = event.event_type.as_deref() else {
                self.note_malformed("ephemeral event without type");
                continue;
            };
            updates.push(SyncUpdate::Ephemeral(EphemeralEvent {
                room_id: room_id.to_owned(),
                event_type: event_type.to_owned(),
                content: event.content.clone(),
            }));
        }
    }

    fn note_malformed(&mut self, what: &str) {
        self.stats.malformed_events += 1;
        warn!(what, "skipping malformed sync payload entry");
    }
}

/// Pull the inviter and room name out of `invite_state` events.
fn enrich_invite_transition(transition: &mut MembershipTransition, events: &[RawSyncEvent]) {
    for event in events {
        match event.event_type.as_deref() {
            Some("m.room.member") => {
                let is_invite = event
                    .content
                    .get("membership")
                    .and_then(Value::as_str)
                    .is_some_and(|membership| membership == "invite");
                if is_invite && transition.sender.is_none() {
                    transition.sender = event.sender.clone();
                }
            }
            Some("m.room.name") => {
                if transition.room_name.is_none() {
                    transition.room_name = event
                        .content
                        .get("name")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> SyncResponse {
        serde_json::from_value(value).expect("test payload should parse")
    }

    fn join_payload_with_e1() -> SyncResponse {
        payload(json!({
            "next_batch": "t1",
            "rooms": {
                "join": {
                    "!r1:example.org": {
                        "state": {
                            "events": [{
                                "event_id": "$s1",
                                "type": "m.room.name",
                                "sender": "@a:example.org",
                                "state_key": "",
                                "content": {"name": "lobby"}
                            }]
                        },
                        "timeline": {
                            "events": [{
                                "event_id": "$e1",
                                "type": "m.room.message",
                                "sender": "@a:example.org",
                                "content": {"msgtype": "m.text", "body": "hi"},
                                "origin_server_ts": 1_700_000_000_000_u64
                            }]
                        }
                    }
                }
            }
        }))
    }

    #[test]
    fn initial_join_emits_transition_then_timeline_event() {
        let mut reconciler = Reconciler::new();
        let updates = reconciler.reconcile(&join_payload_with_e1(), true);

        assert_eq!(updates.len(), 2);
        match &updates[0] {
            SyncUpdate::Membership(transition) => {
                assert_eq!(transition.room_id, "!r1:example.org");
                assert_eq!(transition.old, None);
                assert_eq!(transition.new, Membership::Joined);
            }
            other => panic!("unexpected first update: {other:?}"),
        }
        match &updates[1] {
            SyncUpdate::Timeline(event) => {
                assert_eq!(event.event_id, "$e1");
                assert_eq!(event.sender, "@a:example.org");
                assert_eq!(event.origin_server_ts, 1_700_000_000_000);
            }
            other => panic!("unexpected second update: {other:?}"),
        }

        let snapshot = reconciler
            .snapshot("!r1:example.org")
            .expect("room should exist");
        assert_eq!(snapshot.membership, Membership::Joined);
        assert_eq!(
            snapshot.state_value("m.room.name", ""),
            Some(&json!({"name": "lobby"}))
        );
    }

    #[test]
    fn replaying_a_payload_is_a_no_op() {
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile(&join_payload_with_e1(), true);
        assert_eq!(first.len(), 2);

        let snapshot_before = reconciler.snapshot("!r1:example.org");
        let replay = reconciler.reconcile(&join_payload_with_e1(), true);

        assert!(replay.is_empty(), "replay produced updates: {replay:?}");
        assert_eq!(reconciler.snapshot("!r1:example.org"), snapshot_before);
        assert_eq!(reconciler.stats().duplicate_events, 1);
    }

    #[test]
    fn state_is_last_writer_wins_across_payloads() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(&join_payload_with_e1(), true);

        // A later payload renames the room through the timeline.
        let rename = payload(json!({
            "next_batch": "t2",
            "rooms": {
                "join": {
                    "!r1:example.org": {
                        "timeline": {
                            "events": [{
                                "event_id": "$s2",
                                "type": "m.room.name",
                                "sender": "@a:example.org",
                                "state_key": "",
                                "content": {"name": "renamed"}
                            }]
                        }
                    }
                }
            }
        }));
        let updates = reconciler.reconcile(&rename, true);
        assert_eq!(updates.len(), 1);

        let snapshot = reconciler
            .snapshot("!r1:example.org")
            .expect("room should exist");
        assert_eq!(
            snapshot.state_value("m.room.name", ""),
            Some(&json!({"name": "renamed"}))
        );
    }

    #[test]
    fn invite_is_visible_before_join_and_carries_metadata() {
        let mut reconciler = Reconciler::new();
        let both = payload(json!({
            "next_batch": "t1",
            "rooms": {
                "invite": {
                    "!r2:example.org": {
                        "invite_state": {
                            "events": [
                                {
                                    "type": "m.room.name",
                                    "sender": "@b:example.org",
                                    "state_key": "",
                                    "content": {"name": "garden"}
                                },
                                {
                                    "type": "m.room.member",
                                    "sender": "@b:example.org",
                                    "state_key": "@me:example.org",
                                    "content": {"membership": "invite"}
                                }
                            ]
                        }
                    }
                },
                "join": {
                    "!r2:example.org": {}
                }
            }
        }));

        let updates = reconciler.reconcile(&both, true);
        assert_eq!(updates.len(), 2);
        match &updates[0] {
            SyncUpdate::Membership(transition) => {
                assert_eq!(transition.new, Membership::Invited);
                assert_eq!(transition.sender.as_deref(), Some("@b:example.org"));
                assert_eq!(transition.room_name.as_deref(), Some("garden"));
            }
            other => panic!("unexpected first update: {other:?}"),
        }
        match &updates[1] {
            SyncUpdate::Membership(transition) => {
                assert_eq!(transition.old, Some(Membership::Invited));
                assert_eq!(transition.new, Membership::Joined);
            }
            other => panic!("unexpected second update: {other:?}"),
        }
    }

    #[test]
    fn left_rooms_are_tombstoned_not_removed() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(&join_payload_with_e1(), true);

        let leave = payload(json!({
            "next_batch": "t2",
            "rooms": {"leave": {"!r1:example.org": {}}}
        }));
        let updates = reconciler.reconcile(&leave, true);

        assert_eq!(updates.len(), 1);
        match &updates[0] {
            SyncUpdate::Membership(transition) => {
                assert_eq!(transition.old, Some(Membership::Joined));
                assert_eq!(transition.new, Membership::Left);
            }
            other => panic!("unexpected update: {other:?}"),
        }

        let snapshot = reconciler
            .snapshot("!r1:example.org")
            .expect("tombstoned room should be retained");
        assert_eq!(snapshot.membership, Membership::Left);
        assert_eq!(reconciler.room_ids(), vec!["!r1:example.org".to_owned()]);

        // A late duplicate leave is an idempotent no-op.
        assert!(reconciler.reconcile(&leave, true).is_empty());
    }

    #[test]
    fn malformed_events_are_skipped_without_poisoning_the_payload() {
        let mut reconciler = Reconciler::new();
        let mixed = payload(json!({
            "next_batch": "t1",
            "rooms": {
                "join": {
                    "!r1:example.org": {
                        "timeline": {
                            "events": [
                                {"content": {"body": "no type or id"}},
                                {
                                    "event_id": "$ok",
                                    "type": "m.room.message",
                                    "sender": "@a:example.org",
                                    "content": {"body": "fine"}
                                }
                            ]
                        }
                    }
                }
            }
        }));

        let updates = reconciler.reconcile(&mixed, true);
        let timeline: Vec<_> = updates
            .iter()
            .filter(|update| matches!(update, SyncUpdate::Timeline(_)))
            .collect();
        assert_eq!(timeline.len(), 1);
        assert_eq!(reconciler.stats().malformed_events, 1);
    }

    #[test]
    fn suppressed_delivery_still_applies_state_and_membership() {
        let mut reconciler = Reconciler::new();
        let updates = reconciler.reconcile(&join_payload_with_e1(), false);

        assert_eq!(updates.len(), 1);
        assert!(matches!(updates[0], SyncUpdate::Membership(_)));

        let snapshot = reconciler
            .snapshot("!r1:example.org")
            .expect("room should exist");
        assert_eq!(
            snapshot.state_value("m.room.name", ""),
            Some(&json!({"name": "lobby"}))
        );

        // The suppressed event was still recorded, so it cannot re-surface.
        let replay = reconciler.reconcile(&join_payload_with_e1(), true);
        assert!(replay.is_empty());
    }

    #[test]
    fn ephemeral_events_pass_through_without_touching_state() {
        let mut reconciler = Reconciler::new();
        let typing = payload(json!({
            "next_batch": "t1",
            "rooms": {
                "join": {
                    "!r1:example.org": {
                        "ephemeral": {
                            "events": [{
                                "type": "m.typing",
                                "content": {"user_ids": ["@a:example.org"]}
                            }]
                        }
                    }
                }
            }
        }));

        let updates = reconciler.reconcile(&typing, true);
        let ephemeral: Vec<_> = updates
            .iter()
            .filter_map(|update| match update {
                SyncUpdate::Ephemeral(event) => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(ephemeral.len(), 1);
        assert_eq!(ephemeral[0].event_type, "m.typing");

        let snapshot = reconciler
            .snapshot("!r1:example.org")
            .expect("room should exist");
        assert_eq!(snapshot.state_len(), 0);
    }
}
