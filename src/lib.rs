//! A per-student lecture attendance ledger.
//!
//! The canonical weekly timetable lives in a published spreadsheet; each student's own
//! attendance lives in SQLite, as one log per attended/missed/cancelled lecture plus running
//! per-course counters that always agree with those logs.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod display;
pub mod error;
pub mod manager;
pub mod models;
pub mod reconcile;
pub mod schema;
pub mod semester;
pub mod timetable;

pub use error::{AttendanceError, ConflictKind, Result};
pub use manager::AttendanceManager;
pub use models::{AttendanceLog, CourseAttendance, Occurrence, Status, User};
