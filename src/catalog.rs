//! The course catalog: which courses a `(branch, semester)` selection enrolls a student in.
//!
//! The catalog is a CSV export with one course per line:
//!
//! ```text
//! branch,semester,course_code,course_name,total_lectures
//! CSE,3,CS201,Data Structures,42
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// A single course offered to a `(branch, semester)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub course_code: String,
    pub course_name: String,
    pub total_lectures: i32,
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    branch: String,
    semester: i32,
    course_code: String,
    course_name: String,
    total_lectures: Option<i32>,
}

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    courses: HashMap<(String, i32), Vec<Course>>,
}

impl Catalog {
    pub fn from_path(path: impl AsRef<Path>) -> csv::Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        Self::from_csv(reader)
    }

    pub fn from_reader(rdr: impl Read) -> csv::Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(rdr);
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> csv::Result<Self> {
        let mut catalog = Self::default();

        for record in reader.deserialize() {
            let record: CatalogRecord = record?;
            let course = Course {
                course_code: record.course_code,
                course_name: record.course_name,
                total_lectures: record.total_lectures.unwrap_or_default(),
            };

            let courses = catalog
                .courses
                .entry((record.branch.to_ascii_uppercase(), record.semester))
                .or_default();

            // Later lines win over earlier duplicates of the same code.
            courses.retain(|c| c.course_code != course.course_code);
            courses.push(course);
        }

        Ok(catalog)
    }

    /// The courses for a selection, empty if the catalog has none.
    pub fn courses(&self, branch: &str, semester: i32) -> &[Course] {
        self.courses
            .get(&(branch.trim().to_ascii_uppercase(), semester))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn selections(&self) -> impl Iterator<Item = (&str, i32, &[Course])> {
        self.courses
            .iter()
            .map(|((branch, semester), courses)| (branch.as_str(), *semester, courses.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
branch,semester,course_code,course_name,total_lectures
CSE,3,CS201,Data Structures,42
CSE, 3 ,MA201,Probability,36
cse,3,CS201,Data Structures and Algorithms,40
EE,3,EE201,Signals,
";

    #[test]
    fn groups_by_selection_and_dedupes_codes() {
        let catalog = Catalog::from_reader(CSV.as_bytes()).unwrap();

        let cse = catalog.courses("cse", 3);
        assert_eq!(cse.len(), 2);
        assert_eq!(cse[0].course_code, "MA201");
        assert_eq!(cse[1].course_name, "Data Structures and Algorithms");
        assert_eq!(cse[1].total_lectures, 40);

        assert_eq!(catalog.courses("EE", 3)[0].total_lectures, 0);
        assert!(catalog.courses("CSE", 4).is_empty());
    }
}
