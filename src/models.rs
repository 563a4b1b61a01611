use crate::error::{AttendanceError, Result};
use crate::schema::{attendance_logs, course_attendance, users};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The recorded outcome of a single lecture occurrence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Absent,
    Medical,
    /// The lecture did not happen. Terminal: a cancelled log is never re-marked.
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Present,
        Status::Absent,
        Status::Medical,
        Status::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
            Status::Medical => "medical",
            Status::Cancelled => "cancelled",
        }
    }

    /// Whether a log with this status contributes to one of the course counters.
    pub fn is_counted(self) -> bool {
        !matches!(self, Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("status must be one of: present, absent, medical, cancelled (got {0:?})")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

impl ToSql<Text, Sqlite> for Status {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for Status {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub roll_number: String,
    pub batch: String,
    pub branch: String,
    pub semester: i32,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: Option<&'a str>,
    pub roll_number: &'a str,
    pub batch: &'a str,
    pub branch: &'a str,
    pub semester: i32,
    pub image_url: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

/// The per-user, per-course running totals.
///
/// `*_total` columns are derived from the attendance logs and only change together with a
/// log write. `*_offset` columns hold manual corrections made through
/// [`AttendanceManager::adjust_totals`](crate::manager::AttendanceManager::adjust_totals).
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = course_attendance)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CourseAttendance {
    pub user_id: String,
    pub course_code: String,
    pub course_name: String,
    pub semester: i32,
    pub present_total: i32,
    pub absent_total: i32,
    pub medical_total: i32,
    pub present_offset: i32,
    pub absent_offset: i32,
    pub medical_offset: i32,
    pub total_lectures: i32,
}

impl CourseAttendance {
    /// Number of counted (non-cancelled) logs this row accounts for.
    pub fn logged_total(&self) -> i32 {
        self.present_total + self.absent_total + self.medical_total
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_attendance)]
pub struct NewCourseAttendance<'a> {
    pub user_id: &'a str,
    pub course_code: &'a str,
    pub course_name: &'a str,
    pub semester: i32,
    pub total_lectures: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = attendance_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AttendanceLog {
    pub id: String,
    pub user_id: String,
    pub course_code: String,
    pub lecture_date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: Status,
    pub created_at: NaiveDateTime,
}

/// A specific course's time slot on a specific calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub course_code: String,
    pub lecture_date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl Occurrence {
    /// Builds an occurrence from its wire representation, rejecting empty or inverted intervals.
    pub fn parse(course_code: &str, lecture_date: &str, from: &str, to: &str) -> Result<Self> {
        let course_code = validate_course_code(course_code)?;
        let lecture_date = parse_date(lecture_date)?;
        let start = parse_time_of_day(from).ok_or_else(|| {
            AttendanceError::validation("Start time must be in HH:MM or HH:MM:SS format")
        })?;
        let end = parse_time_of_day(to).ok_or_else(|| {
            AttendanceError::validation("End time must be in HH:MM or HH:MM:SS format")
        })?;

        Self::new(course_code, lecture_date, start, end)
    }

    pub fn new(
        course_code: impl Into<String>,
        lecture_date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self> {
        if start >= end {
            return Err(AttendanceError::validation(
                "Start time must be before end time",
            ));
        }

        Ok(Self {
            course_code: course_code.into(),
            lecture_date,
            start_time: lecture_date.and_time(start),
            end_time: lecture_date.and_time(end),
        })
    }

    /// Whether the two half-open intervals `[start, end)` share any instant.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Course codes are short institutional identifiers such as `CS101`.
pub fn validate_course_code(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(AttendanceError::validation("Course code is required"));
    }
    if code.chars().count() > 6 {
        return Err(AttendanceError::validation(
            "Course code must not exceed 6 characters",
        ));
    }
    Ok(code.to_string())
}

pub fn validate_semester(semester: i32) -> Result<i32> {
    if (1..=10).contains(&semester) {
        Ok(semester)
    } else {
        Err(AttendanceError::validation(
            "Semester must be between 1 and 10",
        ))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    // Clients sometimes send a full ISO timestamp; only the calendar date matters.
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
        AttendanceError::validation("Lecture date must be in ISO format (YYYY-MM-DD)")
    })
}

/// Parses `HH:MM`, `HH:MM:SS`, or the time-of-day portion of
/// `YYYY-MM-DD HH:MM:SS[.fff][Z|±HH:MM]`. Any UTC offset is dropped, not applied.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    let time = match raw.split_once(['T', ' ']) {
        Some((date, rest)) if date.len() == 10 => rest,
        _ => raw,
    };
    let time = time
        .trim_end_matches('Z')
        .split(['.', '+', '-'])
        .next()
        .unwrap_or_default();

    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())
}

/// Formats a timestamp the way the timetable labels its slots.
pub fn format_hhmm(ts: NaiveDateTime) -> String {
    ts.format("%H:%M").to_string()
}
