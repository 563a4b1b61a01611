//! Merges the canonical timetable for a date with the student's own logs for that date.

use crate::db::{self, DbPool};
use crate::error::Result;
use crate::models::{AttendanceLog, CourseAttendance, Status, User, format_hhmm};
use crate::timetable::{Slot, TimetableSource};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One lecture in a student's day, as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LectureView {
    /// The log recorded for this lecture, if the student has acted on it.
    #[serde(rename = "id")]
    pub log_id: Option<String>,
    pub course_code: String,
    pub course_name: String,
    pub from: String,
    pub to: String,
    /// `None` for a timetabled lecture nobody has marked yet.
    pub status: Option<Status>,
    #[serde(rename = "lecture_date")]
    pub lecture_date: NaiveDate,
}

/// `(course_code, from, to)`: the identity of a lecture within a single day.
type SlotKey = (String, String, String);

fn log_key(log: &AttendanceLog) -> SlotKey {
    (
        log.course_code.clone(),
        format_hhmm(log.start_time),
        format_hhmm(log.end_time),
    )
}

/// Builds the day's schedule.
///
/// * A timetable slot with a matching log takes the log's status; a cancelled match removes
///   the slot from the day.
/// * Logs matching no slot are extra classes and are listed unless cancelled.
/// * Only courses in `enrolled` are kept.
/// * When several logs share one occurrence the most recently created one is used.
///
/// The result is ordered by start time.
pub fn reconcile(
    date: NaiveDate,
    slots: Vec<Slot>,
    logs: &[AttendanceLog],
    enrolled: &[CourseAttendance],
) -> Vec<LectureView> {
    let names: HashMap<&str, &str> = enrolled
        .iter()
        .map(|row| (row.course_code.as_str(), row.course_name.as_str()))
        .collect();

    let mut latest: HashMap<SlotKey, &AttendanceLog> = HashMap::new();
    for log in logs {
        let key = log_key(log);
        match latest.get(&key) {
            Some(seen) if seen.created_at > log.created_at => {}
            _ => {
                latest.insert(key, log);
            }
        }
    }

    let mut day = Vec::with_capacity(slots.len() + latest.len());
    let mut timetabled: HashSet<SlotKey> = HashSet::new();

    for slot in slots {
        let key = (slot.course_code.clone(), slot.from.clone(), slot.to.clone());
        if !timetabled.insert(key.clone()) {
            continue;
        }
        if !names.contains_key(slot.course_code.as_str()) {
            debug!(course_code = %slot.course_code, "dropping slot for unenrolled course");
            continue;
        }

        let log = latest.get(&key);
        if log.is_some_and(|log| log.status == Status::Cancelled) {
            continue;
        }

        day.push(LectureView {
            log_id: log.map(|log| log.id.clone()),
            course_code: slot.course_code,
            course_name: slot.course_name,
            from: slot.from,
            to: slot.to,
            status: log.map(|log| log.status),
            lecture_date: date,
        });
    }

    for (key, log) in &latest {
        if timetabled.contains(key) || log.status == Status::Cancelled {
            continue;
        }
        let Some(course_name) = names.get(log.course_code.as_str()) else {
            continue;
        };

        let (course_code, from, to) = key.clone();
        day.push(LectureView {
            log_id: Some(log.id.clone()),
            course_code,
            course_name: course_name.to_string(),
            from,
            to,
            status: Some(log.status),
            lecture_date: date,
        });
    }

    day.sort_by(|a, b| {
        (&a.from, &a.to, &a.course_code).cmp(&(&b.from, &b.to, &b.course_code))
    });
    day
}

/// The reconciled schedule for `user` on `date`.
///
/// A timetable failure is returned as-is rather than rendered as an empty day.
pub async fn reconcile_day(
    source: &dyn TimetableSource,
    pool: &DbPool,
    user: &User,
    date: NaiveDate,
) -> Result<Vec<LectureView>> {
    let slots = source
        .fetch_slots(user.semester, &user.branch, date.weekday())
        .await
        .inspect_err(|err| warn!(user_id = %user.id, %date, %err, "timetable fetch failed"))?;

    let user_id = user.id.clone();
    let (logs, enrolled) = db::with_manager(pool, move |manager| {
        Ok((
            manager.logs_for_day(&user_id, date)?,
            manager.enrolled_courses(&user_id)?,
        ))
    })
    .await?;

    Ok(reconcile(date, slots, &logs, &enrolled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(hhmm: &str) -> NaiveDateTime {
        date().and_time(chrono::NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap())
    }

    fn slot(code: &str, from: &str, to: &str) -> Slot {
        Slot {
            course_code: code.into(),
            course_name: format!("{code} (timetable)"),
            from: from.into(),
            to: to.into(),
        }
    }

    fn log(id: &str, code: &str, from: &str, to: &str, status: Status) -> AttendanceLog {
        AttendanceLog {
            id: id.into(),
            user_id: "u1".into(),
            course_code: code.into(),
            lecture_date: date(),
            start_time: at(from),
            end_time: at(to),
            status,
            created_at: at("08:00"),
        }
    }

    fn enrolled(codes: &[&str]) -> Vec<CourseAttendance> {
        codes
            .iter()
            .map(|code| CourseAttendance {
                user_id: "u1".into(),
                course_code: code.to_string(),
                course_name: format!("{code} (catalog)"),
                semester: 3,
                present_total: 0,
                absent_total: 0,
                medical_total: 0,
                present_offset: 0,
                absent_offset: 0,
                medical_offset: 0,
                total_lectures: 40,
            })
            .collect()
    }

    fn summary(day: &[LectureView]) -> Vec<(&str, &str, Option<Status>)> {
        day.iter()
            .map(|l| (l.course_code.as_str(), l.from.as_str(), l.status))
            .collect()
    }

    #[test]
    fn unmarked_slots_have_no_status() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00")],
            &[],
            &enrolled(&["CS101"]),
        );
        assert_eq!(summary(&day), vec![("CS101", "09:00", None)]);
        assert_eq!(day[0].log_id, None);
        assert_eq!(day[0].course_name, "CS101 (timetable)");
    }

    #[test]
    fn logged_status_annotates_slot() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00")],
            &[log("l1", "CS101", "09:00", "10:00", Status::Medical)],
            &enrolled(&["CS101"]),
        );
        assert_eq!(summary(&day), vec![("CS101", "09:00", Some(Status::Medical))]);
        assert_eq!(day[0].log_id.as_deref(), Some("l1"));
    }

    #[test]
    fn cancellation_removes_slot() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00"), slot("MA101", "10:00", "11:00")],
            &[log("l1", "CS101", "09:00", "10:00", Status::Cancelled)],
            &enrolled(&["CS101", "MA101"]),
        );
        assert_eq!(summary(&day), vec![("MA101", "10:00", None)]);
    }

    #[test]
    fn extra_class_is_listed_in_time_order() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00"), slot("MA101", "16:00", "17:00")],
            &[log("x1", "MA101", "14:00", "15:00", Status::Present)],
            &enrolled(&["CS101", "MA101"]),
        );
        assert_eq!(
            summary(&day),
            vec![
                ("CS101", "09:00", None),
                ("MA101", "14:00", Some(Status::Present)),
                ("MA101", "16:00", None),
            ]
        );
        assert_eq!(day[1].course_name, "MA101 (catalog)");
    }

    #[test]
    fn cancelled_extra_class_is_hidden() {
        let day = reconcile(
            date(),
            vec![],
            &[log("x1", "MA101", "14:00", "15:00", Status::Cancelled)],
            &enrolled(&["MA101"]),
        );
        assert!(day.is_empty());
    }

    #[test]
    fn unenrolled_courses_are_filtered() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00"), slot("HS101", "10:00", "11:00")],
            &[],
            &enrolled(&["CS101"]),
        );
        assert_eq!(summary(&day), vec![("CS101", "09:00", None)]);
    }

    #[test]
    fn duplicate_logs_collapse_to_latest() {
        let mut older = log("old", "CS101", "09:00", "10:00", Status::Absent);
        older.created_at = at("08:00");
        let mut newer = log("new", "CS101", "09:00", "10:00", Status::Present);
        newer.created_at = at("09:30");

        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00")],
            &[newer, older],
            &enrolled(&["CS101"]),
        );
        assert_eq!(summary(&day), vec![("CS101", "09:00", Some(Status::Present))]);
        assert_eq!(day[0].log_id.as_deref(), Some("new"));

        let extra_a = log("a", "CS101", "15:00", "16:00", Status::Absent);
        let mut extra_b = log("b", "CS101", "15:00", "16:00", Status::Present);
        extra_b.created_at = at("15:30");
        let day = reconcile(date(), vec![], &[extra_a, extra_b], &enrolled(&["CS101"]));
        assert_eq!(summary(&day), vec![("CS101", "15:00", Some(Status::Present))]);
    }

    #[test]
    fn serializes_with_client_field_names() {
        let day = reconcile(
            date(),
            vec![slot("CS101", "09:00", "10:00")],
            &[],
            &enrolled(&["CS101"]),
        );
        let json = serde_json::to_value(&day[0]).unwrap();
        assert_eq!(json["courseCode"], "CS101");
        assert_eq!(json["lecture_date"], "2025-03-10");
        assert!(json["id"].is_null());
        assert!(json["status"].is_null());
    }
}
