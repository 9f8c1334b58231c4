//! Client-side Matrix sync engine.
//!
//! One sequential loop long-polls `/sync`, reconciles each payload into
//! room state, fans the resulting updates out to subscribers, and only then
//! advances the sync cursor. Transient failures are absorbed with backoff;
//! authentication failures terminate the loop and surface to the caller.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sync_core::{
    BackoffPolicy, Reconciler, RoomSnapshot, Subscription, SubscriptionHub, SyncCursorState,
    SyncError, SyncErrorCategory, TokenStore,
};

/// Runtime configuration.
pub mod config;
/// Server-side sync filter construction.
pub mod filter;
/// HTTP collaborator seam and request shaping.
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use filter::SyncFilter;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, SyncTransport, TransportError};

pub use sync_core::{
    EphemeralEvent, Membership, MembershipTransition, SyncUpdate, TimelineEvent,
};

/// Invoked after every successful cursor advance, so a caller can
/// checkpoint [`SyncCursorState`] durably.
pub type CheckpointCallback = Arc<dyn Fn(SyncCursorState) + Send + Sync>;

#[derive(Debug)]
struct RunningSyncTask {
    stop: CancellationToken,
    task: JoinHandle<Result<(), SyncError>>,
}

/// Handle to one independent sync session against a homeserver.
///
/// All cursor and room-state mutation happens inside the loop task; this
/// handle only ever observes immutable snapshots.
pub struct SyncClient {
    config: SyncConfig,
    http: Arc<dyn HttpTransport>,
    hub: SubscriptionHub,
    snapshots: Arc<RwLock<HashMap<String, RoomSnapshot>>>,
    cursor: Arc<RwLock<SyncCursorState>>,
    fatal: Arc<RwLock<Option<SyncError>>>,
    checkpoint: Option<CheckpointCallback>,
    task: Mutex<Option<RunningSyncTask>>,
}

impl SyncClient {
    /// Build a client using the default `reqwest`-backed transport.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a client over a caller-supplied HTTP collaborator.
    pub fn with_transport(config: SyncConfig, http: Arc<dyn HttpTransport>) -> Self {
        let hub = SubscriptionHub::new(config.queue_capacity);
        Self {
            config,
            http,
            hub,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            cursor: Arc::new(RwLock::new(SyncCursorState::default())),
            fatal: Arc::new(RwLock::new(None)),
            checkpoint: None,
            task: Mutex::new(None),
        }
    }

    /// Register a checkpoint callback, called after each token advance.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointCallback) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Register a new subscriber; it observes updates published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Read-only snapshot of one room's reconciled state.
    pub fn current_room_state(&self, room_id: &str) -> Option<RoomSnapshot> {
        read_lock(&self.snapshots).get(room_id).cloned()
    }

    /// All rooms seen on this session, tombstoned ones included.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read_lock(&self.snapshots).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The current sync cursor, as a caller would checkpoint it.
    pub fn cursor_state(&self) -> SyncCursorState {
        read_lock(&self.cursor).clone()
    }

    /// The error that terminated the loop, if it died on its own.
    pub fn fatal_error(&self) -> Option<SyncError> {
        read_lock(&self.fatal).clone()
    }

    /// Updates dropped due to full subscriber queues.
    pub fn dropped_updates(&self) -> u64 {
        self.hub.dropped_updates()
    }

    /// Whether the loop task is currently alive.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Start the sync loop, optionally resuming from a persisted token.
    ///
    /// Returns an error when the loop is already running or the
    /// configuration is unusable.
    pub async fn start(&self, initial_token: Option<String>) -> Result<(), SyncError> {
        let mut guard = self.task.lock().await;
        if let Some(running) = guard.as_ref() {
            if !running.task.is_finished() {
                return Err(SyncError::new(
                    SyncErrorCategory::Internal,
                    "sync_already_running",
                    "sync loop is already running",
                ));
            }
        }

        let transport = SyncTransport::new(self.http.clone(), &self.config)?;
        *write_lock(&self.cursor) = TokenStore::new(initial_token).snapshot();
        *write_lock(&self.fatal) = None;
        // Room snapshots belong to a session; a restart begins empty.
        write_lock(&self.snapshots).clear();

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let hub = self.hub.clone();
        let snapshots = self.snapshots.clone();
        let cursor = self.cursor.clone();
        let fatal = self.fatal.clone();
        let checkpoint = self.checkpoint.clone();
        let backoff = BackoffPolicy::new(
            Duration::from_millis(self.config.backoff_base_ms),
            Duration::from_millis(self.config.backoff_max_ms),
        );
        let deliver_initial_events = self.config.deliver_initial_events;

        let task = tokio::spawn(async move {
            let result = run_sync_loop(
                transport,
                hub,
                snapshots,
                cursor,
                checkpoint,
                backoff,
                deliver_initial_events,
                stop_child,
            )
            .await;

            if let Err(err) = &result {
                *write_lock(&fatal) = Some(err.clone());
            }
            result
        });

        *guard = Some(RunningSyncTask { stop, task });
        Ok(())
    }

    /// Cancel the loop and wait for it to wind down.
    ///
    /// Cancellation is prompt: an in-flight long-poll is abandoned rather
    /// than waited out.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let running = { self.task.lock().await.take() };
        let Some(running) = running else {
            return Err(SyncError::new(
                SyncErrorCategory::Internal,
                "sync_not_running",
                "sync loop is not running",
            ));
        };

        running.stop.cancel();
        let _ = running.task.await;
        Ok(())
    }

    /// Wait for the loop to terminate on its own, surfacing the fatal
    /// condition (e.g. expired authentication). Returns `Ok(())` when the
    /// loop is not running.
    pub async fn join(&self) -> Result<(), SyncError> {
        let running = { self.task.lock().await.take() };
        let Some(running) = running else {
            return Ok(());
        };

        match running.task.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::new(
                SyncErrorCategory::Internal,
                "sync_task_aborted",
                "sync task panicked or was aborted",
            )),
        }
    }
}

/// The single sequential driver. Exactly one poll is in flight at a time;
/// the cursor advances only after a payload was reconciled and published.
#[allow(clippy::too_many_arguments)]
async fn run_sync_loop(
    transport: SyncTransport,
    hub: SubscriptionHub,
    snapshots: Arc<RwLock<HashMap<String, RoomSnapshot>>>,
    cursor: Arc<RwLock<SyncCursorState>>,
    checkpoint: Option<CheckpointCallback>,
    backoff: BackoffPolicy,
    deliver_initial_events: bool,
    stop: CancellationToken,
) -> Result<(), SyncError> {
    let mut store = TokenStore::restore(read_lock(&cursor).clone());
    let mut reconciler = Reconciler::new();
    let mut attempt: u32 = 0;
    let mut initial_poll = store.since().is_none();

    info!(resuming = store.since().is_some(), "sync loop started");

    loop {
        if stop.is_cancelled() {
            info!("sync loop stopped");
            return Ok(());
        }

        let outcome = tokio::select! {
            _ = stop.cancelled() => {
                info!("sync loop stopped during long-poll");
                return Ok(());
            }
            outcome = transport.poll(store.since()) => outcome,
        };

        match outcome {
            Ok(payload) => {
                attempt = 0;
                let next_batch = payload.next_batch.clone();

                if payload.is_empty() {
                    debug!(%next_batch, "long-poll expired with no new events");
                    store.advance(next_batch, Vec::new());
                } else {
                    let deliver = deliver_initial_events || !initial_poll;
                    let updates = reconciler.reconcile(&payload, deliver);
                    hub.publish(&updates);
                    publish_snapshots(&reconciler, &snapshots);
                    debug!(updates = updates.len(), %next_batch, "reconciled sync payload");
                    store.advance(next_batch, reconciler.room_ids());
                }

                initial_poll = false;
                let cursor_snapshot = store.snapshot();
                *write_lock(&cursor) = cursor_snapshot.clone();
                if let Some(checkpoint) = &checkpoint {
                    checkpoint(cursor_snapshot);
                }
            }
            Err(err) if err.is_retryable() => {
                let computed = backoff.delay(attempt);
                // The server's retry hint wins when it asks for more patience.
                let delay = match err.retry_after_ms.map(Duration::from_millis) {
                    Some(hint) => computed.max(hint),
                    None => computed,
                };
                attempt = attempt.saturating_add(1);
                warn!(
                    code = %err.code,
                    category = ?err.category,
                    delay_ms = delay.as_millis() as u64,
                    "sync poll failed, backing off"
                );

                tokio::select! {
                    _ = stop.cancelled() => {
                        info!("sync loop stopped during backoff");
                        return Ok(());
                    }
                    _ = sleep(delay) => {}
                }
            }
            Err(err) => {
                error!(
                    code = %err.code,
                    category = ?err.category,
                    "sync loop terminating on unrecoverable error"
                );
                return Err(err);
            }
        }
    }
}

fn publish_snapshots(
    reconciler: &Reconciler,
    snapshots: &Arc<RwLock<HashMap<String, RoomSnapshot>>>,
) {
    let mut map = write_lock(snapshots);
    for snapshot in reconciler.snapshots() {
        map.insert(snapshot.room_id.clone(), snapshot);
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
