use serde_json::json;

/// Server-side sync filter, narrowing which event types the homeserver
/// includes in `/sync` responses.
///
/// Serialized into the `filter` query parameter. An empty filter sends no
/// parameter at all, which means no server-side filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFilter {
    timeline_types: Vec<String>,
    ephemeral_types: Vec<String>,
}

impl SyncFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict timeline delivery to the given event type,
    /// e.g. `m.room.message`.
    pub fn with_timeline_type(mut self, event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        if !self.timeline_types.contains(&event_type) {
            self.timeline_types.push(event_type);
        }
        self
    }

    /// Restrict ephemeral delivery to the given event type,
    /// e.g. `m.typing`.
    pub fn with_ephemeral_type(mut self, event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        if !self.ephemeral_types.contains(&event_type) {
            self.ephemeral_types.push(event_type);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.timeline_types.is_empty() && self.ephemeral_types.is_empty()
    }

    /// Value for the `filter` query parameter, or `None` when unfiltered.
    pub fn to_query_value(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut room = serde_json::Map::new();
        if !self.timeline_types.is_empty() {
            room.insert(
                "timeline".to_owned(),
                json!({"types": self.timeline_types}),
            );
        }
        if !self.ephemeral_types.is_empty() {
            room.insert(
                "ephemeral".to_owned(),
                json!({"types": self.ephemeral_types}),
            );
        }

        Some(json!({"room": room}).to_string())
    }
}
