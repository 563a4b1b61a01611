//! The error type shared by every ledger, reconciliation and lifecycle operation.

use crate::models::Status;

/// What kind of collision a [`AttendanceError::Conflict`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The requested interval overlaps a lecture already logged on that date.
    Overlap,
    /// A log already exists for this exact lecture occurrence.
    DuplicateOccurrence,
    /// A user with this id is already registered.
    DuplicateUser,
}

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// The request carried no usable identity.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller tried to act on another user's data.
    #[error("log {log_id} does not belong to the caller")]
    Forbidden { log_id: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("not enrolled in course {course_code}")]
    CourseNotEnrolled { course_code: String },

    #[error("attendance log {log_id} not found")]
    LogNotFound { log_id: String },

    #[error("{message}")]
    Conflict { kind: ConflictKind, message: String },

    /// Cancelled lectures cannot be re-marked.
    #[error("log {log_id} is cancelled and cannot be changed to {requested}")]
    TerminalStateViolation { log_id: String, requested: Status },

    #[error("no courses found for branch {branch}, semester {semester}")]
    NoCoursesForSelection { branch: String, semester: i32 },

    /// The timetable could not be fetched or decoded.
    #[error("timetable unavailable: {0}")]
    SourceUnavailable(String),

    /// The timetable answered, but reported a structural error.
    #[error("timetable error: {0}")]
    SourceData(String),

    /// A counter would have gone below zero; the ledger is out of sync with its logs.
    #[error("{counter} counter for {course_code} would underflow")]
    CounterUnderflow {
        course_code: String,
        counter: &'static str,
    },

    #[error("store error: {0}")]
    Store(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AttendanceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable name surfaced to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::CourseNotEnrolled { .. } => "course_not_enrolled",
            Self::LogNotFound { .. } => "log_not_found",
            Self::Conflict { .. } => "conflict",
            Self::TerminalStateViolation { .. } => "terminal_state_violation",
            Self::NoCoursesForSelection { .. } => "no_courses_for_selection",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::SourceData(_) => "source_data_error",
            Self::CounterUnderflow { .. }
            | Self::Store(_)
            | Self::Pool(_)
            | Self::Task(_) => "store_error",
        }
    }
}

pub type Result<T, E = AttendanceError> = std::result::Result<T, E>;
