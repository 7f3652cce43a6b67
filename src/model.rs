use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Booking conflict test of an existing period (`self`) against a candidate.
    ///
    /// Three clauses, any of which is a conflict:
    /// 1. existing start lies in `[candidate.start, candidate.end)`
    /// 2. existing end lies in `(candidate.start, candidate.end]`
    /// 3. existing fully contains the candidate
    ///
    /// Touching endpoints never conflict; identical periods always do.
    pub fn conflicts_with(&self, candidate: &Span) -> bool {
        let starts_inside = self.start >= candidate.start && self.start < candidate.end;
        let ends_inside = self.end > candidate.start && self.end <= candidate.end;
        let contains = self.start <= candidate.start && self.end >= candidate.end;
        starts_inside || ends_inside || contains
    }
}

/// One reservation of one workspace by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub workspace_id: Ulid,
    pub period: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub description: Option<String>,
    /// Seats; informational, a workspace still holds one booking at a time.
    pub capacity: u32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub username: String,
}

/// Mutable workspace fields, shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFields {
    pub name: String,
    pub location: String,
    pub description: Option<String>,
    pub capacity: u32,
}

#[derive(Debug, Clone)]
pub struct WorkspaceState {
    pub workspace: Workspace,
    /// All bookings of this workspace, sorted by `period.start`.
    pub bookings: Vec<Booking>,
}

impl WorkspaceState {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by period.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.period.start, |b| b.period.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn get_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// First booking (other than `exclude`) that conflicts with `candidate`.
    ///
    /// Every clause of [`Span::conflicts_with`] implies `existing.start < candidate.end`,
    /// so bookings at or past that point are skipped by binary search.
    pub fn find_conflict(&self, candidate: &Span, exclude: Option<Ulid>) -> Option<&Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.period.start < candidate.end);
        self.bookings[..right_bound]
            .iter()
            .filter(|b| Some(b.id) != exclude)
            .find(|b| b.period.conflicts_with(candidate))
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
    },
    WorkspaceCreated {
        id: Ulid,
        name: String,
        location: String,
        description: Option<String>,
        capacity: u32,
        at: Ms,
    },
    WorkspaceUpdated {
        id: Ulid,
        name: String,
        location: String,
        description: Option<String>,
        capacity: u32,
        at: Ms,
    },
    WorkspaceDeleted {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        user_id: Ulid,
        workspace_id: Ulid,
        span: Span,
    },
    BookingRescheduled {
        id: Ulid,
        workspace_id: Ulid,
        span: Span,
    },
    BookingDeleted {
        id: Ulid,
        workspace_id: Ulid,
    },
}
