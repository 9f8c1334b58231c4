//! Protocol-level sync primitives shared by the sync loop and its consumers.
//!
//! This crate is free of I/O. It defines the `/sync` payload model, the room
//! state reconciler, the retry/backoff policy, the sync cursor store, and the
//! subscriber fan-out hub.

/// Backoff policy used by the sync retry loop.
pub mod backoff;
/// Stable sync error types and HTTP/errcode classification helpers.
pub mod error;
/// Subscriber fan-out with bounded per-subscriber queues.
pub mod hub;
/// Serde model of the `/sync` response wire format.
pub mod payload;
/// Event reconciliation into per-room state.
pub mod reconcile;
/// Room state, membership, and read-only snapshots.
pub mod room;
/// Sync cursor (since-token) store.
pub mod token;

pub use backoff::BackoffPolicy;
pub use error::{SyncError, SyncErrorCategory, classify_errcode, classify_http_status};
pub use hub::{Subscription, SubscriptionHub};
pub use payload::{
    EphemeralSection, InvitedRoomSection, JoinedRoomSection, LeftRoomSection, MatrixErrorBody,
    RawSyncEvent, RoomsSection, StateSection, SyncResponse, TimelineSection,
};
pub use reconcile::{EphemeralEvent, ReconcileStats, Reconciler, SyncUpdate, TimelineEvent};
pub use room::{Membership, MembershipTransition, RoomSnapshot, RoomState};
pub use token::{SyncCursorState, TokenStore};
