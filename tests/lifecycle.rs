mod common;

use common::{catalog, lecture, memory_db, register, registration};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use lecture_attendance::catalog::Catalog;
use lecture_attendance::manager::AttendanceManager;
use lecture_attendance::schema::{attendance_logs, course_attendance};
use lecture_attendance::{AttendanceError, ConflictKind, Status};

fn enrolled_codes(manager: &mut AttendanceManager<'_>, user: &str) -> Vec<String> {
    manager
        .enrolled_courses(user)
        .unwrap()
        .into_iter()
        .map(|row| row.course_code)
        .collect()
}

#[test]
fn registration_enrolls_the_catalog_selection() {
    let mut conn = memory_db();
    let mut manager = AttendanceManager::new(&mut conn);

    let user = manager
        .register(&catalog(), &registration("u1", "cse", 3))
        .unwrap();
    assert_eq!(user.branch, "CSE");
    assert_eq!(user.semester, 3);

    let rows = manager.enrolled_courses("u1").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].course_name, "Data Structures");
    assert_eq!(rows[0].total_lectures, 40);
    assert!(rows.iter().all(|row| row.logged_total() == 0 && row.semester == 3));
}

#[test]
fn enrolling_skips_existing_courses() {
    let mut conn = memory_db();
    register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    assert_eq!(manager.enroll(&catalog(), "u1", "CSE", 3).unwrap(), 0);
    assert_eq!(manager.enroll(&catalog(), "u1", "ECE", 3).unwrap(), 1);
    assert_eq!(enrolled_codes(&mut manager, "u1"), vec!["CS201", "EC201", "MA201"]);

    let err = manager.enroll(&catalog(), "u1", "CSE", 9).unwrap_err();
    assert_eq!(err.kind(), "no_courses_for_selection");
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut conn = memory_db();
    register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    let err = manager
        .register(&catalog(), &registration("u1", "CSE", 4))
        .unwrap_err();
    assert!(matches!(
        err,
        AttendanceError::Conflict {
            kind: ConflictKind::DuplicateUser,
            ..
        }
    ));
    assert_eq!(manager.get_user("u1").unwrap().semester, 3);
}

#[test]
fn registration_without_courses_writes_nothing() {
    let mut conn = memory_db();
    let mut manager = AttendanceManager::new(&mut conn);

    let err = manager
        .register(&catalog(), &registration("u1", "MECH", 3))
        .unwrap_err();
    assert_eq!(err.kind(), "no_courses_for_selection");
    assert!(manager.find_user("u1").unwrap().is_none());
}

#[test]
fn registration_is_validated() {
    let mut conn = memory_db();
    let mut manager = AttendanceManager::new(&mut conn);

    let mut bad_batch = registration("u1", "CSE", 3);
    bad_batch.batch = "22".into();
    assert_eq!(manager.register(&catalog(), &bad_batch).unwrap_err().kind(), "validation_error");

    let bad_semester = registration("u1", "CSE", 11);
    assert_eq!(
        manager.register(&catalog(), &bad_semester).unwrap_err().kind(),
        "validation_error"
    );
}

#[test]
fn changing_semester_provisions_new_courses() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    let moved = manager.change_semester(&catalog(), &user, 4).unwrap();
    assert_eq!(moved.semester, 4);
    assert_eq!(
        enrolled_codes(&mut manager, "u1"),
        vec!["CS201", "CS301", "CS302", "MA201"]
    );

    // Going back to a semester that is already provisioned only changes the semester.
    let back = manager.change_semester(&catalog(), &moved, 3).unwrap();
    assert_eq!(back.semester, 3);
    assert_eq!(enrolled_codes(&mut manager, "u1").len(), 4);
}

#[test]
fn changing_to_an_empty_selection_fails() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    let err = manager.change_semester(&catalog(), &user, 7).unwrap_err();
    assert!(matches!(
        err,
        AttendanceError::NoCoursesForSelection { semester: 7, .. }
    ));
    assert_eq!(manager.get_user("u1").unwrap().semester, 3);
}

#[test]
fn semester_change_is_all_or_nothing() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    conn.batch_execute(
        "CREATE TRIGGER fail_semester BEFORE UPDATE OF semester ON users \
         BEGIN SELECT RAISE(ABORT, 'injected'); END;",
    )
    .unwrap();
    let mut manager = AttendanceManager::new(&mut conn);

    let err = manager.change_semester(&catalog(), &user, 4).unwrap_err();
    assert_eq!(err.kind(), "store_error");

    assert_eq!(enrolled_codes(&mut manager, "u1"), vec!["CS201", "MA201"]);
    assert_eq!(manager.get_user("u1").unwrap().semester, 3);
}

#[test]
fn reset_drops_courses_missing_from_the_catalog() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    manager
        .create_log(&user, &lecture("MA201", (9, 0), (10, 0)), Status::Present)
        .unwrap();
    manager
        .create_log(&user, &lecture("CS201", (10, 0), (11, 0)), Status::Present)
        .unwrap();

    let corrected = Catalog::from_reader(
        "branch,semester,course_code,course_name,total_lectures\n\
         CSE,3,CS201,Data Structures,40\n\
         CSE,3,CS299,Discrete Maths,30\n"
            .as_bytes(),
    )
    .unwrap();

    let summary = manager.reset_semester(&corrected, &user).unwrap();
    assert_eq!(summary.removed_courses, vec!["MA201"]);
    assert_eq!(summary.seeded_courses, 1);

    assert_eq!(enrolled_codes(&mut manager, "u1"), vec!["CS201", "CS299"]);
    assert!(manager.logs_for_course("u1", "MA201").unwrap().is_empty());
    assert_eq!(manager.get_course("u1", "CS201").unwrap().present_total, 1);
}

#[test]
fn unenrolling_removes_logs_and_counters() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    let mut manager = AttendanceManager::new(&mut conn);

    manager
        .create_log(&user, &lecture("MA201", (9, 0), (10, 0)), Status::Absent)
        .unwrap();

    let summary = manager.unenroll(&user, "MA201").unwrap();
    assert!(summary.removed);
    assert_eq!(summary.deleted_logs, 1);
    assert_eq!(enrolled_codes(&mut manager, "u1"), vec!["CS201"]);

    let again = manager.unenroll(&user, "MA201").unwrap();
    assert!(!again.removed);
    assert_eq!(again.deleted_logs, 0);
}

#[test]
fn deleting_a_user_cascades() {
    let mut conn = memory_db();
    let user = register(&mut conn, "u1");
    let keeper = register(&mut conn, "u2");
    {
        let mut manager = AttendanceManager::new(&mut conn);
        manager
            .create_log(&user, &lecture("CS201", (9, 0), (10, 0)), Status::Present)
            .unwrap();
        manager
            .create_log(&keeper, &lecture("CS201", (9, 0), (10, 0)), Status::Present)
            .unwrap();

        manager.delete_user(&user).unwrap();
        assert!(manager.find_user("u1").unwrap().is_none());
        assert_eq!(manager.delete_user(&user).unwrap_err().kind(), "not_found");
    }

    let logs: i64 = attendance_logs::table
        .filter(attendance_logs::user_id.eq("u1"))
        .count()
        .get_result(&mut conn)
        .unwrap();
    let rows: i64 = course_attendance::table
        .filter(course_attendance::user_id.eq("u1"))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!((logs, rows), (0, 0));

    let mut manager = AttendanceManager::new(&mut conn);
    assert_eq!(manager.logs_for_course("u2", "CS201").unwrap().len(), 1);
}
