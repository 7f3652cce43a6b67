use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, EntityKind};

impl Engine {
    /// Whether `[start, end)` conflicts with any booking on the workspace,
    /// ignoring `exclude`. Unknown workspaces have no bookings and never conflict.
    pub async fn check_conflict(
        &self,
        workspace_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> bool {
        let Some(ws) = self.get_workspace_state(&workspace_id) else {
            return false;
        };
        let guard = ws.read().await;
        guard.find_conflict(&Span { start, end }, exclude).is_some()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn get_workspace(&self, id: &Ulid) -> Option<Workspace> {
        let ws = self.get_workspace_state(id)?;
        let guard = ws.read().await;
        Some(guard.workspace.clone())
    }

    /// All workspaces, ordered by name.
    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        let states: Vec<_> = self.workspaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for ws in states {
            out.push(ws.read().await.workspace.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let workspace_id = *self.booking_to_workspace.get(id)?.value();
        let ws = self.get_workspace_state(&workspace_id)?;
        let guard = ws.read().await;
        guard.get_booking(*id).cloned()
    }

    /// Bookings of one workspace, ordered by start.
    pub async fn list_workspace_bookings(&self, workspace_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        let ws = self
            .get_workspace_state(workspace_id)
            .ok_or(EngineError::NotFound(EntityKind::Workspace, *workspace_id))?;
        let guard = ws.read().await;
        Ok(guard.bookings.clone())
    }

    /// Every booking across all workspaces, ordered by start then id.
    pub async fn list_bookings(&self) -> Vec<Booking> {
        let states: Vec<_> = self.workspaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ws in states {
            out.extend(ws.read().await.bookings.iter().cloned());
        }
        out.sort_by_key(|b| (b.period.start, b.id));
        out
    }
}
