#![allow(dead_code)]

use chrono::{NaiveDate, NaiveTime};
use diesel::SqliteConnection;
use lecture_attendance::catalog::Catalog;
use lecture_attendance::db;
use lecture_attendance::manager::AttendanceManager;
use lecture_attendance::models::{Occurrence, User};
use lecture_attendance::semester::Registration;

pub const CATALOG: &str = "\
branch,semester,course_code,course_name,total_lectures
CSE,3,CS201,Data Structures,40
CSE,3,MA201,Probability,36
CSE,4,CS301,Algorithms,40
CSE,4,CS302,Operating Systems,38
ECE,3,EC201,Signals,40
";

pub fn catalog() -> Catalog {
    Catalog::from_reader(CATALOG.as_bytes()).unwrap()
}

/// A fresh private in-memory ledger.
pub fn memory_db() -> SqliteConnection {
    db::establish(":memory:").unwrap()
}

pub fn registration(id: &str, branch: &str, semester: i32) -> Registration {
    Registration {
        id: id.to_string(),
        email: format!("{id}@example.edu"),
        first_name: "Test".to_string(),
        last_name: Some("Student".to_string()),
        roll_number: "22CS1001".to_string(),
        batch: "2022".to_string(),
        branch: branch.to_string(),
        semester,
        image_url: None,
    }
}

pub fn register(conn: &mut SqliteConnection, id: &str) -> User {
    AttendanceManager::new(conn)
        .register(&catalog(), &registration(id, "CSE", 3))
        .unwrap()
}

pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn lecture(code: &str, from: (u32, u32), to: (u32, u32)) -> Occurrence {
    Occurrence::new(code, monday(), hm(from.0, from.1), hm(to.0, to.1)).unwrap()
}
