use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The sync cursor tuple that must survive across poll cycles.
///
/// This is the single piece of state a caller would checkpoint for
/// crash-consistency; the engine itself keeps it in memory only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncCursorState {
    /// Opaque `next_batch` token from the last fully reconciled payload.
    /// `None` means the next poll is a full initial sync.
    pub since: Option<String>,
    /// Room IDs seen so far, including tombstoned (left) rooms.
    pub known_rooms: BTreeSet<String>,
}

/// Owner of the sync cursor. Mutated only by the sync loop.
///
/// The token advances through [`TokenStore::advance`] strictly after the
/// corresponding payload has been reconciled and published.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    cursor: SyncCursorState,
}

impl TokenStore {
    /// Create a store, optionally resuming from a previously issued token.
    pub fn new(initial_token: Option<String>) -> Self {
        Self {
            cursor: SyncCursorState {
                since: initial_token.filter(|token| !token.is_empty()),
                known_rooms: BTreeSet::new(),
            },
        }
    }

    /// Restore a full cursor snapshot, e.g. from an external checkpoint.
    pub fn restore(cursor: SyncCursorState) -> Self {
        Self { cursor }
    }

    /// The token to supply on the next poll.
    pub fn since(&self) -> Option<&str> {
        self.cursor.since.as_deref()
    }

    /// Advance the cursor after a payload was fully reconciled and
    /// delivered, recording any newly seen rooms.
    pub fn advance<I>(&mut self, next_batch: String, rooms: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.cursor.since = Some(next_batch);
        self.cursor.known_rooms.extend(rooms);
    }

    /// Whether a room has been seen on this cursor.
    pub fn knows_room(&self, room_id: &str) -> bool {
        self.cursor.known_rooms.contains(room_id)
    }

    /// Clone the current cursor state for checkpointing.
    pub fn snapshot(&self) -> SyncCursorState {
        self.cursor.clone()
    }
}
