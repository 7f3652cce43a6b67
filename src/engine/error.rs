use ulid::Ulid;

/// Which directory a missing id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Workspace,
    Booking,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::Workspace => "workspace",
            EntityKind::Booking => "booking",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    /// `start_at >= end_at`.
    InvalidPeriod,
    /// `start_at` earlier than the wall clock at creation.
    StartInPast,
    InvalidField(&'static str),
    /// Overlaps the given existing booking.
    Conflict(Ulid),
    /// The requesting user does not own this booking.
    Forbidden(Ulid),
    NameTaken(String),
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::InvalidPeriod => write!(f, "end time must be after start time"),
            EngineError::StartInPast => write!(f, "cannot book a start time in the past"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "workspace is already booked during this period (booking {id})")
            }
            EngineError::Forbidden(id) => write!(f, "booking {id} does not belong to you"),
            EngineError::NameTaken(name) => write!(f, "name already taken: {name}"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete workspace {id}: it still has bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
