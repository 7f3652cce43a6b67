mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::{EngineError, EntityKind};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedWorkspaceState = Arc<RwLock<WorkspaceState>>;
pub(super) type WorkspaceWriteGuard = OwnedRwLockWriteGuard<WorkspaceState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch.
/// 5. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), error = %e, batch = batch.len(), "WAL flush failed");
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        // Compaction must see every append that was queued before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Booking store: users, workspaces and their bookings, rebuilt from the WAL
/// at startup and kept in memory.
///
/// Each workspace sits behind its own `RwLock`. Booking mutations hold that
/// write lock across the conflict check, the WAL append and the in-memory
/// apply, so two writers can never both pass the check for one workspace.
///
/// The maps are `Arc`-shared so a commit task can apply to them after the
/// calling future is gone (see [`Engine::commit`]).
pub struct Engine {
    pub(super) workspaces: Arc<DashMap<Ulid, SharedWorkspaceState>>,
    pub(super) workspace_names: Arc<DashMap<String, Ulid>>,
    pub(super) users: Arc<DashMap<Ulid, User>>,
    pub(super) usernames: Arc<DashMap<String, Ulid>>,
    /// Reverse lookup: booking id → workspace id
    pub(super) booking_to_workspace: Arc<DashMap<Ulid, Ulid>>,
    /// Serializes directory writes (user/workspace create, rename, delete)
    /// so name uniqueness checks and their WAL appends don't interleave.
    pub(super) directory_lock: Arc<Mutex<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a booking or workspace-update event to one workspace.
/// Caller holds the write lock.
fn apply_to_workspace(ws: &mut WorkspaceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            user_id,
            workspace_id,
            span,
        } => {
            ws.insert_booking(Booking {
                id: *id,
                user_id: *user_id,
                workspace_id: *workspace_id,
                period: *span,
            });
            index.insert(*id, *workspace_id);
        }
        Event::BookingRescheduled { id, span, .. } => {
            if let Some(mut booking) = ws.remove_booking(*id) {
                booking.period = *span;
                ws.insert_booking(booking);
            }
        }
        Event::BookingDeleted { id, .. } => {
            ws.remove_booking(*id);
            index.remove(id);
        }
        Event::WorkspaceUpdated {
            name,
            location,
            description,
            capacity,
            at,
            ..
        } => {
            ws.workspace.name = name.clone();
            ws.workspace.location = location.clone();
            ws.workspace.description = description.clone();
            ws.workspace.capacity = *capacity;
            ws.workspace.updated_at = *at;
        }
        // Directory-level events are handled on the maps, not here
        Event::UserRegistered { .. } | Event::WorkspaceCreated { .. } | Event::WorkspaceDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            workspaces: Arc::new(DashMap::new()),
            workspace_names: Arc::new(DashMap::new()),
            users: Arc::new(DashMap::new()),
            usernames: Arc::new(DashMap::new()),
            booking_to_workspace: Arc::new(DashMap::new()),
            directory_lock: Arc::new(Mutex::new(())),
            wal_tx,
        };

        // Sole owner of every lock during replay, so try_write never contends.
        // Never block here: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            users = engine.users.len(),
            workspaces = engine.workspaces.len(),
            bookings = engine.booking_to_workspace.len(),
            "engine state restored"
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, username } => {
                self.users.insert(*id, User { id: *id, username: username.clone() });
                self.usernames.insert(username.clone(), *id);
            }
            Event::WorkspaceCreated {
                id,
                name,
                location,
                description,
                capacity,
                at,
            } => {
                let ws = WorkspaceState::new(Workspace {
                    id: *id,
                    name: name.clone(),
                    location: location.clone(),
                    description: description.clone(),
                    capacity: *capacity,
                    created_at: *at,
                    updated_at: *at,
                });
                self.workspaces.insert(*id, Arc::new(RwLock::new(ws)));
                self.workspace_names.insert(name.clone(), *id);
            }
            Event::WorkspaceDeleted { id } => {
                if let Some((_, ws)) = self.workspaces.remove(id)
                    && let Ok(guard) = ws.try_read()
                {
                    self.workspace_names.remove(&guard.workspace.name);
                }
            }
            other => {
                let Some(workspace_id) = event_workspace_id(other) else {
                    return;
                };
                let Some(ws) = self.get_workspace_state(&workspace_id) else {
                    tracing::warn!(%workspace_id, "replayed event for unknown workspace, skipping");
                    return;
                };
                let Ok(mut guard) = ws.try_write() else {
                    return;
                };
                if let Event::WorkspaceUpdated { name, .. } = other {
                    self.workspace_names.remove(&guard.workspace.name);
                    self.workspace_names.insert(name.clone(), workspace_id);
                }
                apply_to_workspace(&mut guard, other, &self.booking_to_workspace);
            }
        }
    }

    /// Make `event` durable, then run `apply`, both on a task of their own.
    ///
    /// The caller's future may be dropped at any await (client disconnect,
    /// request timeout). Once the event is handed to the writer it will be in
    /// the log after a restart, so memory must follow it regardless. Locks the
    /// apply depends on are moved into `apply` and released when it finishes.
    pub(super) async fn commit<T, F>(&self, event: Event, apply: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, event).await?;
            Ok::<T, EngineError>(apply())
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    pub(super) fn get_workspace_state(&self, id: &Ulid) -> Option<SharedWorkspaceState> {
        self.workspaces.get(id).map(|e| e.value().clone())
    }

    /// Commit a workspace-scoped event and apply it under `guard`. The guard
    /// comes back once the apply is done.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: WorkspaceWriteGuard,
        event: Event,
    ) -> Result<WorkspaceWriteGuard, EngineError> {
        let index = self.booking_to_workspace.clone();
        let applied = event.clone();
        self.commit(event, move || {
            apply_to_workspace(&mut guard, &applied, &index);
            guard
        })
        .await
    }

    /// Write-lock the workspace holding `booking_id`.
    ///
    /// Re-checks the booking under the lock: it may have been deleted while
    /// we waited.
    pub(super) async fn lock_booking_workspace(
        &self,
        booking_id: &Ulid,
    ) -> Result<WorkspaceWriteGuard, EngineError> {
        let not_found = || EngineError::NotFound(EntityKind::Booking, *booking_id);
        let workspace_id = self.booking_to_workspace.get(booking_id).map(|e| *e.value()).ok_or_else(not_found)?;
        let ws = self.get_workspace_state(&workspace_id).ok_or_else(not_found)?;
        let guard = ws.write_owned().await;
        if guard.get_booking(*booking_id).is_none() {
            return Err(not_found());
        }
        Ok(guard)
    }

    /// Write-lock a workspace, failing if it was deleted while we waited.
    pub(super) async fn lock_workspace(
        &self,
        workspace_id: &Ulid,
    ) -> Result<WorkspaceWriteGuard, EngineError> {
        let not_found = || EngineError::NotFound(EntityKind::Workspace, *workspace_id);
        let ws = self.get_workspace_state(workspace_id).ok_or_else(not_found)?;
        let guard = ws.write_owned().await;
        if !self.workspaces.contains_key(workspace_id) {
            return Err(not_found());
        }
        Ok(guard)
    }
}

/// Send one event to the writer task and wait for its fsync.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// Extract the workspace id from a booking or workspace-update event.
fn event_workspace_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { workspace_id, .. }
        | Event::BookingRescheduled { workspace_id, .. }
        | Event::BookingDeleted { workspace_id, .. } => Some(*workspace_id),
        Event::WorkspaceUpdated { id, .. } => Some(*id),
        Event::UserRegistered { .. } | Event::WorkspaceCreated { .. } | Event::WorkspaceDeleted { .. } => None,
    }
}
