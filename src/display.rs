use crate::catalog::Catalog;
use crate::manager::CourseReport;
use crate::reconcile::LectureView;
use chrono::NaiveDate;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct ReportRow {
    course: String,
    name: String,
    present: i32,
    absent: i32,
    medical: i32,
    lectures: i32,
    attendance: String,
}

#[derive(Tabled)]
struct LectureRow {
    from: String,
    to: String,
    course: String,
    name: String,
    status: String,
}

#[derive(Tabled)]
struct CatalogRow {
    branch: String,
    semester: i32,
    course: String,
    name: String,
    lectures: i32,
}

pub fn report_table(reports: &[CourseReport]) -> Table {
    let rows = reports.iter().map(|report| ReportRow {
        course: report.course_code.clone(),
        name: report.course_name.clone(),
        present: report.present,
        absent: report.absent,
        medical: report.medical,
        lectures: report.total_lectures,
        attendance: report
            .attendance_percentage
            .map_or_else(|| "-".to_string(), |pct| format!("{pct:.1}%")),
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table
}

pub fn schedule_table(lectures: &[LectureView]) -> Table {
    let rows = lectures.iter().map(|lecture| LectureRow {
        from: lecture.from.clone(),
        to: lecture.to.clone(),
        course: lecture.course_code.clone(),
        name: lecture.course_name.clone(),
        status: lecture
            .status
            .map_or_else(|| "unmarked".to_string(), |status| status.to_string()),
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table
}

pub fn catalog_table(catalog: &Catalog, selection: Option<(&str, i32)>) -> Table {
    let mut rows: Vec<CatalogRow> = catalog
        .selections()
        .filter(|(branch, semester, _)| {
            selection.is_none_or(|(b, s)| branch.eq_ignore_ascii_case(b) && *semester == s)
        })
        .flat_map(|(branch, semester, courses)| {
            courses.iter().map(move |course| CatalogRow {
                branch: branch.to_string(),
                semester,
                course: course.course_code.clone(),
                name: course.course_name.clone(),
                lectures: course.total_lectures,
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        (&a.branch, a.semester, &a.course).cmp(&(&b.branch, b.semester, &b.course))
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table
}

/// Pretty prints a student's attendance totals.
pub fn show_report(user_id: &str, reports: &[CourseReport]) {
    if reports.is_empty() {
        println!("{user_id} is not enrolled in any course.");
        return;
    }
    println!("Attendance for {user_id}:\n{}", report_table(reports));
}

/// Pretty prints a student's lectures for one day.
pub fn show_schedule(date: NaiveDate, lectures: &[LectureView]) {
    if lectures.is_empty() {
        println!("No lectures on {date}.");
        return;
    }
    println!("Lectures on {date} ({}):\n{}", date.format("%A"), schedule_table(lectures));
}

pub fn show_catalog(catalog: &Catalog, selection: Option<(&str, i32)>) {
    println!("Course catalog:\n{}", catalog_table(catalog, selection));
}
