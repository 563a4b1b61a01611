//! Enrollment changes: registration, semester transitions, resets and unenrollment.
//!
//! Each operation provisions or removes [`CourseAttendance`](crate::models::CourseAttendance)
//! rows together with whatever else it changes, inside one transaction.

use crate::catalog::{Catalog, Course};
use crate::error::{AttendanceError, ConflictKind, Result};
use crate::manager::AttendanceManager;
use crate::models::{NewCourseAttendance, NewUser, User, validate_semester};
use crate::schema;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::QueryResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Profile data captured when a verified identity signs up.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(rename = "oid")]
    pub id: String,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub roll_number: String,
    pub batch: String,
    pub branch: String,
    pub semester: i32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Registration {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AttendanceError::validation("OID is required"));
        }
        if !self.email.contains('@') {
            return Err(AttendanceError::validation("Email must be a valid email"));
        }
        if self.first_name.trim().is_empty() {
            return Err(AttendanceError::validation("First name is required"));
        }
        if self.roll_number.is_empty() || !self.roll_number.chars().all(char::is_alphanumeric) {
            return Err(AttendanceError::validation(
                "Roll number must be alphanumeric",
            ));
        }
        if self.batch.len() != 4 || !self.batch.chars().all(|c| c.is_ascii_digit()) {
            return Err(AttendanceError::validation(
                "Batch must be exactly 4 digits (e.g., 2025)",
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(AttendanceError::validation("Branch is required"));
        }
        validate_semester(self.semester)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub removed_courses: Vec<String>,
    pub seeded_courses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnenrollSummary {
    pub course_code: String,
    pub removed: bool,
    pub deleted_logs: usize,
}

impl AttendanceManager<'_> {
    /// Creates a user and enrolls them in their semester's courses.
    ///
    /// Nothing is written if the selection has no courses or the id is already taken.
    pub fn register(&mut self, catalog: &Catalog, registration: &Registration) -> Result<User> {
        registration.validate()?;

        let branch_code = registration.branch.trim().to_ascii_uppercase();
        let courses = courses_for(catalog, &branch_code, registration.semester)?;

        let user = self.db.immediate_transaction(|conn| {
            use schema::users::dsl::*;

            let taken: i64 = users
                .filter(id.eq(&registration.id))
                .count()
                .get_result(conn)?;
            if taken > 0 {
                return Err(AttendanceError::conflict(
                    ConflictKind::DuplicateUser,
                    "user already registered",
                ));
            }

            diesel::insert_into(users)
                .values(NewUser {
                    id: &registration.id,
                    email: &registration.email,
                    first_name: &registration.first_name,
                    last_name: registration.last_name.as_deref(),
                    roll_number: &registration.roll_number,
                    batch: &registration.batch,
                    branch: &branch_code,
                    semester: registration.semester,
                    image_url: registration.image_url.as_deref(),
                    created_at: Utc::now().naive_utc(),
                })
                .execute(conn)?;

            provision(conn, &registration.id, registration.semester, courses)?;

            Ok(users
                .find(&registration.id)
                .select(User::as_select())
                .first(conn)?)
        })?;

        info!(
            user_id = %user.id,
            branch = %user.branch,
            semester = user.semester,
            "user registered"
        );
        Ok(user)
    }

    /// Seeds a counter row for every course in the `(branch, semester)` selection.
    ///
    /// Courses the user is already enrolled in are skipped. Returns how many rows were created.
    pub fn enroll(
        &mut self,
        catalog: &Catalog,
        user: &str,
        branch: &str,
        semester: i32,
    ) -> Result<usize> {
        let courses = courses_for(catalog, branch, semester)?;
        let seeded = self
            .db
            .immediate_transaction(|conn| provision(conn, user, semester, courses))?;

        info!(user_id = user, branch, semester, seeded, "enrolled");
        Ok(seeded)
    }

    /// Moves the caller to `new_semester`, provisioning its courses if needed.
    pub fn change_semester(
        &mut self,
        catalog: &Catalog,
        caller: &User,
        new_semester: i32,
    ) -> Result<User> {
        validate_semester(new_semester)?;
        let courses = catalog.courses(&caller.branch, new_semester);

        let user = self.db.immediate_transaction(|conn| {
            let enrolled = enrolled_codes(conn, &caller.id)?;
            let provisioned = !courses.is_empty()
                && courses
                    .iter()
                    .all(|course| enrolled.contains(&course.course_code));

            if !provisioned {
                let courses = courses_for(catalog, &caller.branch, new_semester)?;
                provision(conn, &caller.id, new_semester, courses)?;
            }

            use schema::users::dsl::*;

            diesel::update(users.find(&caller.id))
                .set(semester.eq(new_semester))
                .execute(conn)?;

            Ok::<_, AttendanceError>(users
                .find(&caller.id)
                .select(User::as_select())
                .first(conn)?)
        })?;

        info!(
            user_id = %caller.id,
            from = caller.semester,
            to = new_semester,
            "semester changed"
        );
        Ok(user)
    }

    /// Re-derives the caller's courses from the catalog.
    ///
    /// Courses that are no longer in the catalog lose their counters and logs; catalog courses
    /// the caller lacks are seeded. Meant for catalog corrections.
    pub fn reset_semester(&mut self, catalog: &Catalog, caller: &User) -> Result<ResetSummary> {
        let courses = courses_for(catalog, &caller.branch, caller.semester)?;
        let keep: HashSet<&str> = courses.iter().map(|c| c.course_code.as_str()).collect();

        let summary = self.db.immediate_transaction(|conn| {
            let mut stale: Vec<String> = enrolled_codes(conn, &caller.id)?
                .into_iter()
                .filter(|code| !keep.contains(code.as_str()))
                .collect();
            stale.sort();

            {
                use schema::attendance_logs::dsl::*;

                diesel::delete(
                    attendance_logs
                        .filter(user_id.eq(&caller.id))
                        .filter(course_code.eq_any(&stale)),
                )
                .execute(conn)?;
            }
            {
                use schema::course_attendance::dsl::*;

                diesel::delete(
                    course_attendance
                        .filter(user_id.eq(&caller.id))
                        .filter(course_code.eq_any(&stale)),
                )
                .execute(conn)?;
            }

            let seeded_courses = provision(conn, &caller.id, caller.semester, courses)?;

            Ok::<_, AttendanceError>(ResetSummary {
                removed_courses: stale,
                seeded_courses,
            })
        })?;

        info!(
            user_id = %caller.id,
            removed = summary.removed_courses.len(),
            seeded = summary.seeded_courses,
            "semester reset"
        );
        Ok(summary)
    }

    /// Drops a course: its logs first, then its counter row.
    pub fn unenroll(&mut self, caller: &User, code: &str) -> Result<UnenrollSummary> {
        let summary = self.db.immediate_transaction(|conn| {
            let deleted_logs = {
                use schema::attendance_logs::dsl::*;

                diesel::delete(
                    attendance_logs
                        .filter(user_id.eq(&caller.id))
                        .filter(course_code.eq(code)),
                )
                .execute(conn)?
            };

            let removed = {
                use schema::course_attendance::dsl::*;

                diesel::delete(
                    course_attendance
                        .filter(user_id.eq(&caller.id))
                        .filter(course_code.eq(code)),
                )
                .execute(conn)?
            };

            Ok::<_, AttendanceError>(UnenrollSummary {
                course_code: code.to_string(),
                removed: removed > 0,
                deleted_logs,
            })
        })?;

        info!(
            user_id = %caller.id,
            course_code = code,
            deleted_logs = summary.deleted_logs,
            "unenrolled"
        );
        Ok(summary)
    }

    /// Removes the caller's account; counters and logs go with it.
    pub fn delete_user(&mut self, caller: &User) -> Result<()> {
        use schema::users::dsl::*;

        let deleted = diesel::delete(users.find(&caller.id)).execute(self.db)?;
        if deleted == 0 {
            return Err(AttendanceError::not_found(format!("user {}", caller.id)));
        }

        info!(user_id = %caller.id, "user deleted");
        Ok(())
    }
}

fn courses_for<'a>(catalog: &'a Catalog, branch: &str, semester: i32) -> Result<&'a [Course]> {
    let courses = catalog.courses(branch, semester);
    if courses.is_empty() {
        return Err(AttendanceError::NoCoursesForSelection {
            branch: branch.to_string(),
            semester,
        });
    }
    Ok(courses)
}

fn enrolled_codes(conn: &mut SqliteConnection, user: &str) -> QueryResult<HashSet<String>> {
    use schema::course_attendance::dsl::*;

    Ok(course_attendance
        .filter(user_id.eq(user))
        .select(course_code)
        .load::<String>(conn)?
        .into_iter()
        .collect())
}

/// Inserts a counter row per course, ignoring courses that already have one.
fn provision(
    conn: &mut SqliteConnection,
    user: &str,
    semester: i32,
    courses: &[Course],
) -> QueryResult<usize> {
    let rows: Vec<NewCourseAttendance> = courses
        .iter()
        .map(|course| NewCourseAttendance {
            user_id: user,
            course_code: &course.course_code,
            course_name: &course.course_name,
            semester,
            total_lectures: course.total_lectures,
        })
        .collect();

    diesel::insert_or_ignore_into(schema::course_attendance::table)
        .values(rows)
        .execute(conn)
}
