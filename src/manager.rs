use crate::error::{AttendanceError, ConflictKind, Result};
use crate::models::{AttendanceLog, CourseAttendance, Occurrence, Status, User};
use crate::schema;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::result::QueryResult;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// The manager for recording, modifying, and retrieving attendance data.
///
/// Every operation that touches a course counter runs inside a single `BEGIN IMMEDIATE`
/// transaction, so a log and the counter it contributes to are always committed together and
/// concurrent writers to the same counter row are serialized by SQLite.
pub struct AttendanceManager<'c> {
    pub(crate) db: &'c mut SqliteConnection,
}

/// Manual corrections to a course's totals. `None` leaves a value untouched.
#[derive(Debug, Clone, Default)]
pub struct TotalsAdjustment {
    pub course_code: String,
    pub present_total: Option<i32>,
    pub absent_total: Option<i32>,
    pub medical_total: Option<i32>,
    pub total_lectures: Option<i32>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = schema::course_attendance)]
struct OffsetChangeset {
    present_offset: Option<i32>,
    absent_offset: Option<i32>,
    medical_offset: Option<i32>,
    total_lectures: Option<i32>,
}

/// The totals a student sees for one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseReport {
    pub course_code: String,
    pub course_name: String,
    pub semester: i32,
    pub present: i32,
    pub absent: i32,
    pub medical: i32,
    pub total_lectures: i32,
    /// `present / (present + absent)`; medical leave is excused. `None` before any lecture.
    pub attendance_percentage: Option<f64>,
}

impl From<&CourseAttendance> for CourseReport {
    fn from(row: &CourseAttendance) -> Self {
        let present = row.present_total.saturating_add(row.present_offset).max(0);
        let absent = row.absent_total.saturating_add(row.absent_offset).max(0);
        let medical = row.medical_total.saturating_add(row.medical_offset).max(0);
        let attended_or_missed = f64::from(present) + f64::from(absent);

        Self {
            course_code: row.course_code.clone(),
            course_name: row.course_name.clone(),
            semester: row.semester,
            present,
            absent,
            medical,
            total_lectures: row.total_lectures,
            attendance_percentage: (attended_or_missed > 0.0)
                .then(|| f64::from(present) * 100.0 / attended_or_missed),
        }
    }
}

impl<'c> AttendanceManager<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Looks up a registered user.
    pub fn find_user(&mut self, user_id: &str) -> QueryResult<Option<User>> {
        use schema::users::dsl::*;

        users
            .find(user_id)
            .select(User::as_select())
            .first(self.db)
            .optional()
    }

    /// Retrieves a registered user, failing with [`AttendanceError::NotFound`] if absent.
    pub fn get_user(&mut self, user_id: &str) -> Result<User> {
        self.find_user(user_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("user {user_id}")))
    }

    /// Every course the user currently has a counter row for, ordered by course code.
    pub fn enrolled_courses(&mut self, user: &str) -> QueryResult<Vec<CourseAttendance>> {
        use schema::course_attendance::dsl::*;

        course_attendance
            .filter(user_id.eq(user))
            .order(course_code.asc())
            .select(CourseAttendance::as_select())
            .load(self.db)
    }

    /// Retrieves the counter row for one course.
    pub fn get_course(&mut self, user: &str, code: &str) -> Result<CourseAttendance> {
        find_course(self.db, user, code)?.ok_or_else(|| AttendanceError::CourseNotEnrolled {
            course_code: code.to_string(),
        })
    }

    /// All logs the user has on `date`, ordered by start time and then creation time.
    pub fn logs_for_day(
        &mut self,
        user: &str,
        date: NaiveDate,
    ) -> QueryResult<Vec<AttendanceLog>> {
        logs_on(self.db, user, date)
    }

    pub fn logs_for_course(&mut self, user: &str, code: &str) -> QueryResult<Vec<AttendanceLog>> {
        use schema::attendance_logs::dsl::*;

        attendance_logs
            .filter(user_id.eq(user))
            .filter(course_code.eq(code))
            .order((lecture_date.asc(), start_time.asc()))
            .select(AttendanceLog::as_select())
            .load(self.db)
    }

    pub fn get_log(&mut self, log_id: &str) -> Result<AttendanceLog> {
        find_log(self.db, log_id)?.ok_or_else(|| AttendanceError::LogNotFound {
            log_id: log_id.to_string(),
        })
    }

    /// Number of logs that should be reflected in the course counters.
    pub fn count_counted_logs(&mut self, user: &str, code: &str) -> QueryResult<i64> {
        use schema::attendance_logs::dsl::*;

        attendance_logs
            .filter(user_id.eq(user))
            .filter(course_code.eq(code))
            .filter(status.ne(Status::Cancelled))
            .count()
            .get_result(self.db)
    }

    /// Records the caller's first action on a lecture occurrence.
    ///
    /// Fails with [`AttendanceError::CourseNotEnrolled`] if the caller has no counter row for the
    /// course, and with a [`ConflictKind::DuplicateOccurrence`] conflict if the occurrence is
    /// already logged (use [`Self::update_status`] for that).
    ///
    /// Returns every log the caller has for that course on that date.
    pub fn create_log(
        &mut self,
        caller: &User,
        occurrence: &Occurrence,
        new_status: Status,
    ) -> Result<Vec<AttendanceLog>> {
        let logs = self.db.immediate_transaction(|conn| {
            ensure_enrolled(conn, &caller.id, &occurrence.course_code)?;
            ensure_unlogged(conn, &caller.id, occurrence)?;

            insert_log(conn, &caller.id, occurrence, new_status)?;
            logs_for_course_on(conn, &caller.id, &occurrence.course_code, occurrence.lecture_date)
        })?;

        info!(
            user_id = %caller.id,
            course_code = %occurrence.course_code,
            lecture_date = %occurrence.lecture_date,
            status = %new_status,
            "attendance logged"
        );
        Ok(logs)
    }

    /// Adds a lecture that is not on the timetable.
    ///
    /// The interval must not overlap any lecture the caller already has logged on that date;
    /// cancelled lectures do not count as occupying their slot. An occurrence that is already
    /// logged, cancelled or not, is rejected the same way [`Self::create_log`] rejects it.
    pub fn add_extra_class(
        &mut self,
        caller: &User,
        occurrence: &Occurrence,
        new_status: Status,
    ) -> Result<AttendanceLog> {
        let log = self.db.immediate_transaction(|conn| {
            ensure_enrolled(conn, &caller.id, &occurrence.course_code)?;
            ensure_unlogged(conn, &caller.id, occurrence)?;

            let clash = logs_on(conn, &caller.id, occurrence.lecture_date)?
                .into_iter()
                .filter(|log| log.status.is_counted())
                .find(|log| occurrence.overlaps(log.start_time, log.end_time));

            if let Some(existing) = clash {
                return Err(AttendanceError::conflict(
                    ConflictKind::Overlap,
                    format!(
                        "lecture time overlaps {} from {} to {}",
                        existing.course_code,
                        existing.start_time.format("%H:%M"),
                        existing.end_time.format("%H:%M"),
                    ),
                ));
            }

            insert_log(conn, &caller.id, occurrence, new_status)
        })?;

        info!(
            user_id = %caller.id,
            course_code = %log.course_code,
            lecture_date = %log.lecture_date,
            "extra class added"
        );
        Ok(log)
    }

    /// Moves a logged lecture to `new_status`, moving one unit between the course counters.
    ///
    /// Setting the status a log already has is a no-op. Cancelled logs are terminal.
    pub fn update_status(
        &mut self,
        caller: &User,
        log_id: &str,
        new_status: Status,
    ) -> Result<AttendanceLog> {
        let (log, changed) = self.db.immediate_transaction(|conn| {
            let log = find_log(conn, log_id)?.ok_or_else(|| AttendanceError::LogNotFound {
                log_id: log_id.to_string(),
            })?;

            if log.user_id != caller.id {
                return Err(AttendanceError::Forbidden {
                    log_id: log.id.clone(),
                });
            }
            if log.status == Status::Cancelled {
                return Err(AttendanceError::TerminalStateViolation {
                    log_id: log.id.clone(),
                    requested: new_status,
                });
            }
            if log.status == new_status {
                return Ok((log, false));
            }

            apply_delta(conn, &log.user_id, &log.course_code, log.status, -1)?;
            apply_delta(conn, &log.user_id, &log.course_code, new_status, 1)?;

            {
                use schema::attendance_logs::dsl::*;

                diesel::update(attendance_logs.find(&log.id))
                    .set(status.eq(new_status))
                    .execute(conn)?;
            }

            Ok((
                AttendanceLog {
                    status: new_status,
                    ..log
                },
                true,
            ))
        })?;

        if changed {
            info!(user_id = %caller.id, log_id, status = %new_status, "attendance status updated");
        } else {
            debug!(user_id = %caller.id, log_id, status = %new_status, "status unchanged");
        }
        Ok(log)
    }

    /// Overrides the totals shown for a course.
    ///
    /// The log-derived counters are left alone; the difference between the requested value and
    /// the counter is stored as an offset, so later status changes keep moving the total.
    pub fn adjust_totals(
        &mut self,
        caller: &User,
        adjustment: &TotalsAdjustment,
    ) -> Result<CourseReport> {
        let requested = [
            adjustment.present_total,
            adjustment.absent_total,
            adjustment.medical_total,
            adjustment.total_lectures,
        ];
        if requested.iter().flatten().any(|value| *value < 0) {
            return Err(AttendanceError::validation("totals must not be negative"));
        }
        if requested.iter().all(Option::is_none) {
            return Err(AttendanceError::validation("nothing to adjust"));
        }

        let row = self.db.immediate_transaction(|conn| {
            let row = find_course(conn, &caller.id, &adjustment.course_code)?.ok_or_else(|| {
                AttendanceError::not_found(format!(
                    "attendance record for {}",
                    adjustment.course_code
                ))
            })?;

            let changes = OffsetChangeset {
                present_offset: adjustment.present_total.map(|v| v - row.present_total),
                absent_offset: adjustment.absent_total.map(|v| v - row.absent_total),
                medical_offset: adjustment.medical_total.map(|v| v - row.medical_total),
                total_lectures: adjustment.total_lectures,
            };

            {
                use schema::course_attendance::dsl::*;

                diesel::update(
                    course_attendance
                        .filter(user_id.eq(&caller.id))
                        .filter(course_code.eq(&adjustment.course_code)),
                )
                .set(&changes)
                .execute(conn)?;
            }

            find_course(conn, &caller.id, &adjustment.course_code)?.ok_or_else(|| {
                AttendanceError::not_found(format!(
                    "attendance record for {}",
                    adjustment.course_code
                ))
            })
        })?;

        info!(user_id = %caller.id, course_code = %adjustment.course_code, "totals adjusted");
        Ok(CourseReport::from(&row))
    }

    /// Totals for every enrolled course, or for a single one.
    pub fn report(&mut self, caller: &User, code: Option<&str>) -> Result<Vec<CourseReport>> {
        match code {
            Some(code) => {
                let row = find_course(self.db, &caller.id, code)?.ok_or_else(|| {
                    AttendanceError::not_found(format!("attendance record for {code}"))
                })?;
                Ok(vec![CourseReport::from(&row)])
            }
            None => Ok(self
                .enrolled_courses(&caller.id)?
                .iter()
                .map(CourseReport::from)
                .collect()),
        }
    }
}

pub(crate) fn find_course(
    conn: &mut SqliteConnection,
    user: &str,
    code: &str,
) -> QueryResult<Option<CourseAttendance>> {
    use schema::course_attendance::dsl::*;

    course_attendance
        .filter(user_id.eq(user))
        .filter(course_code.eq(code))
        .select(CourseAttendance::as_select())
        .first(conn)
        .optional()
}

fn ensure_enrolled(conn: &mut SqliteConnection, user: &str, code: &str) -> Result<()> {
    match find_course(conn, user, code)? {
        Some(_) => Ok(()),
        None => Err(AttendanceError::CourseNotEnrolled {
            course_code: code.to_string(),
        }),
    }
}

fn ensure_unlogged(
    conn: &mut SqliteConnection,
    user: &str,
    occurrence: &Occurrence,
) -> Result<()> {
    match find_occurrence(conn, user, occurrence)? {
        Some(existing) => Err(AttendanceError::conflict(
            ConflictKind::DuplicateOccurrence,
            format!(
                "lecture is already logged as {} (log {}); update its status instead",
                existing.status, existing.id
            ),
        )),
        None => Ok(()),
    }
}

fn find_log(conn: &mut SqliteConnection, log_id: &str) -> QueryResult<Option<AttendanceLog>> {
    use schema::attendance_logs::dsl::*;

    attendance_logs
        .find(log_id)
        .select(AttendanceLog::as_select())
        .first(conn)
        .optional()
}

fn find_occurrence(
    conn: &mut SqliteConnection,
    user: &str,
    occurrence: &Occurrence,
) -> QueryResult<Option<AttendanceLog>> {
    use schema::attendance_logs::dsl::*;

    attendance_logs
        .filter(user_id.eq(user))
        .filter(course_code.eq(&occurrence.course_code))
        .filter(lecture_date.eq(occurrence.lecture_date))
        .filter(start_time.eq(occurrence.start_time))
        .filter(end_time.eq(occurrence.end_time))
        .select(AttendanceLog::as_select())
        .first(conn)
        .optional()
}

fn logs_on(
    conn: &mut SqliteConnection,
    user: &str,
    date: NaiveDate,
) -> QueryResult<Vec<AttendanceLog>> {
    use schema::attendance_logs::dsl::*;

    attendance_logs
        .filter(user_id.eq(user))
        .filter(lecture_date.eq(date))
        .order((start_time.asc(), created_at.asc()))
        .select(AttendanceLog::as_select())
        .load(conn)
}

fn logs_for_course_on(
    conn: &mut SqliteConnection,
    user: &str,
    code: &str,
    date: NaiveDate,
) -> Result<Vec<AttendanceLog>> {
    use schema::attendance_logs::dsl::*;

    Ok(attendance_logs
        .filter(user_id.eq(user))
        .filter(course_code.eq(code))
        .filter(lecture_date.eq(date))
        .order((start_time.asc(), created_at.asc()))
        .select(AttendanceLog::as_select())
        .load(conn)?)
}

/// Inserts a log and bumps the counter it belongs to. Must run inside a transaction.
fn insert_log(
    conn: &mut SqliteConnection,
    user: &str,
    occurrence: &Occurrence,
    new_status: Status,
) -> Result<AttendanceLog> {
    let log = AttendanceLog {
        id: Uuid::new_v4().to_string(),
        user_id: user.to_string(),
        course_code: occurrence.course_code.clone(),
        lecture_date: occurrence.lecture_date,
        start_time: occurrence.start_time,
        end_time: occurrence.end_time,
        status: new_status,
        created_at: Utc::now().naive_utc(),
    };

    apply_delta(conn, user, &occurrence.course_code, new_status, 1)?;

    diesel::insert_into(schema::attendance_logs::table)
        .values(&log)
        .execute(conn)?;

    Ok(log)
}

/// Adds `delta` to the counter matching `counter`. Cancelled lectures have no counter.
///
/// The update only matches when the result stays non-negative; a decrement that finds no row
/// means the counters have drifted from the logs and the surrounding transaction is aborted.
fn apply_delta(
    conn: &mut SqliteConnection,
    user: &str,
    code: &str,
    counter: Status,
    delta: i32,
) -> Result<()> {
    use schema::course_attendance::dsl::*;

    let row = course_attendance
        .filter(user_id.eq(user))
        .filter(course_code.eq(code));

    let updated = match counter {
        Status::Present => diesel::update(row.filter(present_total.ge(-delta)))
            .set(present_total.eq(present_total + delta))
            .execute(conn)?,
        Status::Absent => diesel::update(row.filter(absent_total.ge(-delta)))
            .set(absent_total.eq(absent_total + delta))
            .execute(conn)?,
        Status::Medical => diesel::update(row.filter(medical_total.ge(-delta)))
            .set(medical_total.eq(medical_total + delta))
            .execute(conn)?,
        Status::Cancelled => return Ok(()),
    };

    if updated == 0 {
        return Err(AttendanceError::CounterUnderflow {
            course_code: code.to_string(),
            counter: counter.as_str(),
        });
    }
    Ok(())
}
