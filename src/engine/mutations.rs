use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_order, validate_span};
use super::{apply_to_workspace, Engine, EngineError, EntityKind, WalCommand};

fn validate_username(username: &str) -> Result<(), EngineError> {
    if username.trim().is_empty() {
        return Err(EngineError::InvalidField("username must not be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(EngineError::LimitExceeded("username too long"));
    }
    Ok(())
}

fn validate_workspace_fields(fields: &WorkspaceFields) -> Result<(), EngineError> {
    if fields.name.trim().is_empty() {
        return Err(EngineError::InvalidField("workspace name must not be empty"));
    }
    if fields.location.trim().is_empty() {
        return Err(EngineError::InvalidField("workspace location must not be empty"));
    }
    if fields.capacity == 0 {
        return Err(EngineError::InvalidField("capacity must be at least 1"));
    }
    if fields.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("workspace name too long"));
    }
    if fields.location.len() > MAX_LOCATION_LEN {
        return Err(EngineError::LimitExceeded("workspace location too long"));
    }
    if fields.description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("workspace description too long"));
    }
    Ok(())
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(&self, username: String) -> Result<User, EngineError> {
        validate_username(&username)?;
        let directory = self.directory_lock.clone().lock_owned().await;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.usernames.contains_key(&username) {
            return Err(EngineError::NameTaken(username));
        }

        let id = Ulid::new();
        let user = User { id, username };
        let event = Event::UserRegistered { id, username: user.username.clone() };
        let (users, usernames) = (self.users.clone(), self.usernames.clone());
        let registered = user.clone();
        self.commit(event, move || {
            let _directory = directory;
            usernames.insert(registered.username.clone(), registered.id);
            users.insert(registered.id, registered);
        })
        .await?;
        tracing::info!(user_id = %id, username = %user.username, "user registered");
        Ok(user)
    }

    // ── Workspaces ───────────────────────────────────────────

    pub async fn create_workspace(&self, fields: WorkspaceFields) -> Result<Workspace, EngineError> {
        validate_workspace_fields(&fields)?;
        let directory = self.directory_lock.clone().lock_owned().await;
        if self.workspaces.len() >= MAX_WORKSPACES {
            return Err(EngineError::LimitExceeded("too many workspaces"));
        }
        if self.workspace_names.contains_key(&fields.name) {
            return Err(EngineError::NameTaken(fields.name));
        }

        let id = Ulid::new();
        let at = now_ms();
        let event = Event::WorkspaceCreated {
            id,
            name: fields.name.clone(),
            location: fields.location.clone(),
            description: fields.description.clone(),
            capacity: fields.capacity,
            at,
        };
        let workspace = Workspace {
            id,
            name: fields.name,
            location: fields.location,
            description: fields.description,
            capacity: fields.capacity,
            created_at: at,
            updated_at: at,
        };
        let (workspaces, names) = (self.workspaces.clone(), self.workspace_names.clone());
        let created = workspace.clone();
        self.commit(event, move || {
            let _directory = directory;
            names.insert(created.name.clone(), id);
            workspaces.insert(id, Arc::new(RwLock::new(WorkspaceState::new(created))));
        })
        .await?;
        tracing::info!(workspace_id = %id, name = %workspace.name, "workspace created");
        Ok(workspace)
    }

    pub async fn update_workspace(
        &self,
        id: Ulid,
        fields: WorkspaceFields,
    ) -> Result<Workspace, EngineError> {
        validate_workspace_fields(&fields)?;
        let directory = self.directory_lock.clone().lock_owned().await;
        let mut guard = self.lock_workspace(&id).await?;
        if let Some(owner) = self.workspace_names.get(&fields.name)
            && *owner.value() != id
        {
            return Err(EngineError::NameTaken(fields.name));
        }

        let old_name = guard.workspace.name.clone();
        let event = Event::WorkspaceUpdated {
            id,
            name: fields.name,
            location: fields.location,
            description: fields.description,
            capacity: fields.capacity,
            at: now_ms(),
        };
        let (names, index) = (self.workspace_names.clone(), self.booking_to_workspace.clone());
        let applied = event.clone();
        self.commit(event, move || {
            let _directory = directory;
            apply_to_workspace(&mut guard, &applied, &index);
            if old_name != guard.workspace.name {
                names.remove(&old_name);
                names.insert(guard.workspace.name.clone(), id);
            }
            guard.workspace.clone()
        })
        .await
    }

    /// Refused while the workspace still has bookings.
    pub async fn delete_workspace(&self, id: Ulid) -> Result<Workspace, EngineError> {
        let directory = self.directory_lock.clone().lock_owned().await;
        let guard = self.lock_workspace(&id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }

        let (workspaces, names) = (self.workspaces.clone(), self.workspace_names.clone());
        let workspace = self
            .commit(Event::WorkspaceDeleted { id }, move || {
                let _directory = directory;
                workspaces.remove(&id);
                names.remove(&guard.workspace.name);
                guard.workspace.clone()
            })
            .await?;
        tracing::info!(workspace_id = %id, "workspace deleted");
        Ok(workspace)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Preconditions are checked in order and the first failure is returned:
    /// user exists, workspace exists, `start < end`, start not in the past,
    /// no conflicting booking on the workspace.
    pub async fn create_booking(
        &self,
        user_id: Ulid,
        workspace_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::NotFound(EntityKind::User, user_id));
        }
        if !self.workspaces.contains_key(&workspace_id) {
            return Err(EngineError::NotFound(EntityKind::Workspace, workspace_id));
        }
        validate_order(start, end)?;
        if start < now_ms() {
            return Err(EngineError::StartInPast);
        }
        let span = Span::new(start, end);
        validate_span(&span)?;

        let guard = self.lock_workspace(&workspace_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_WORKSPACE {
            return Err(EngineError::LimitExceeded("too many bookings on workspace"));
        }
        check_no_conflict(&guard, &span, None)?;

        let id = Ulid::new();
        let event = Event::BookingCreated { id, user_id, workspace_id, span };
        self.persist_and_apply(guard, event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(booking_id = %id, %workspace_id, %user_id, start, end, "booking created");
        Ok(Booking { id, user_id, workspace_id, period: span })
    }

    /// Replace a booking's period. The booking itself is excluded from the
    /// conflict scan. Past start times are accepted here.
    pub async fn update_booking(&self, id: Ulid, start: Ms, end: Ms) -> Result<Booking, EngineError> {
        if !self.booking_to_workspace.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Booking, id));
        }
        validate_order(start, end)?;
        let span = Span::new(start, end);
        validate_span(&span)?;

        let guard = self.lock_booking_workspace(&id).await?;
        check_no_conflict(&guard, &span, Some(id))?;

        let workspace_id = guard.workspace.id;
        let event = Event::BookingRescheduled { id, workspace_id, span };
        let guard = self.persist_and_apply(guard, event).await?;
        tracing::info!(booking_id = %id, %workspace_id, start, end, "booking rescheduled");
        guard
            .get_booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Booking, id))
    }

    /// Only the owning user may delete a booking.
    pub async fn delete_booking(&self, id: Ulid, requesting_user: Ulid) -> Result<Booking, EngineError> {
        let guard = self.lock_booking_workspace(&id).await?;
        let booking = guard
            .get_booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Booking, id))?;
        if booking.user_id != requesting_user {
            tracing::warn!(booking_id = %id, owner = %booking.user_id, %requesting_user, "delete by non-owner refused");
            return Err(EngineError::Forbidden(id));
        }

        let event = Event::BookingDeleted { id, workspace_id: booking.workspace_id };
        self.persist_and_apply(guard, event).await?;
        tracing::info!(booking_id = %id, workspace_id = %booking.workspace_id, "booking deleted");
        Ok(booking)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    ///
    /// Holds the directory lock and a read lock on every workspace until the
    /// writer has swapped files, so no append can land in the old file after
    /// the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _directory = self.directory_lock.lock().await;

        let mut ids: Vec<Ulid> = self.workspaces.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ws) = self.get_workspace_state(&id) {
                guards.push(ws.read_owned().await);
            }
        }

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|u| Event::UserRegistered {
                id: u.id,
                username: u.username.clone(),
            })
            .collect();
        for guard in &guards {
            let ws = &guard.workspace;
            events.push(Event::WorkspaceCreated {
                id: ws.id,
                name: ws.name.clone(),
                location: ws.location.clone(),
                description: ws.description.clone(),
                capacity: ws.capacity,
                at: ws.created_at,
            });
            if ws.updated_at != ws.created_at {
                events.push(Event::WorkspaceUpdated {
                    id: ws.id,
                    name: ws.name.clone(),
                    location: ws.location.clone(),
                    description: ws.description.clone(),
                    capacity: ws.capacity,
                    at: ws.updated_at,
                });
            }
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                id: b.id,
                user_id: b.user_id,
                workspace_id: b.workspace_id,
                span: b.period,
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
