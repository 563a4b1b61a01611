//! Canonical lecture slots from the institution's timetable spreadsheet.
//!
//! The timetable is a Google Sheet with one tab per branch. Each semester owns a block of 13
//! columns: the first holds the course name / course code lookup rows, the remaining 12 are time
//! slots whose *label* encodes the slot and the course taught on every weekday, e.g.
//!
//! ```text
//! 9:00-10:00 CS201 MA201 CS201  EE201 HS101
//! ```
//!
//! Positions are separated by single spaces, Monday first; an empty position means no lecture.

use crate::error::{AttendanceError, Result};
use async_trait::async_trait;
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Width of a semester's column block, plus the blank separator column after it.
const BLOCK_STRIDE: usize = 14;
const BLOCK_WIDTH: usize = 13;
const SLOT_COLUMNS: usize = 12;

/// A lecture as scheduled by the master timetable, independent of any student's actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub course_code: String,
    pub course_name: String,
    pub from: String,
    pub to: String,
}

/// Read-only access to canonical slots.
///
/// Implementations must be thread-safe; the schedule endpoint calls them concurrently.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    /// Canonical slots for one weekday, merged and ordered by start time.
    async fn fetch_slots(&self, semester: i32, branch: &str, weekday: Weekday) -> Result<Vec<Slot>>;
}

#[async_trait]
impl<T: TimetableSource + ?Sized> TimetableSource for Arc<T> {
    async fn fetch_slots(
        &self,
        semester: i32,
        branch: &str,
        weekday: Weekday,
    ) -> Result<Vec<Slot>> {
        (**self).fetch_slots(semester, branch, weekday).await
    }
}

/// Spreadsheet column name for a zero-based index (`0 → A`, `26 → AA`).
pub fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

/// The 13 columns holding `semester`'s timetable.
pub fn semester_columns(semester: i32) -> Result<Vec<String>> {
    if !(1..=10).contains(&semester) {
        return Err(AttendanceError::validation(format!(
            "no timetable columns for semester {semester}"
        )));
    }
    let start = BLOCK_STRIDE * (semester as usize - 1);
    Ok((start..start + BLOCK_WIDTH).map(column_name).collect())
}

/// Zero-pads `H:MM` to `HH:MM`. Returns `None` for anything that is not a time of day.
pub fn normalize_time(raw: &str) -> Option<String> {
    let (hours, minutes) = raw.trim().split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    (hours < 24 && minutes < 60).then(|| format!("{hours:02}:{minutes:02}"))
}

/// Collapses back-to-back periods of the same course into a single slot.
pub fn merge_adjacent(slots: Vec<Slot>) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::with_capacity(slots.len());

    for slot in slots {
        match merged.last_mut() {
            Some(prev) if prev.course_code == slot.course_code && prev.to == slot.from => {
                prev.to = slot.to;
            }
            _ => merged.push(slot),
        }
    }

    merged
}

#[derive(Debug, Deserialize)]
struct GvizResponse {
    status: Option<String>,
    #[serde(default)]
    errors: Vec<GvizError>,
    table: Option<GvizTable>,
}

#[derive(Debug, Deserialize)]
struct GvizError {
    message: Option<String>,
    detailed_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GvizTable {
    #[serde(default)]
    cols: Vec<GvizColumn>,
    #[serde(default)]
    rows: Vec<GvizRow>,
}

#[derive(Debug, Deserialize)]
struct GvizColumn {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct GvizRow {
    #[serde(default)]
    c: Vec<Option<GvizCell>>,
}

#[derive(Debug, Deserialize)]
struct GvizCell {
    v: Option<serde_json::Value>,
}

impl GvizRow {
    fn text(&self, index: usize) -> Option<String> {
        let value = self.c.get(index)?.as_ref()?.v.as_ref()?;
        let text = match value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Unwraps the `google.visualization.Query.setResponse(...)` envelope.
pub fn parse_gviz_payload(raw: &str) -> Result<GvizTable> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(AttendanceError::SourceUnavailable(
            "timetable response contained no JSON object".into(),
        ));
    };
    if end < start {
        return Err(AttendanceError::SourceUnavailable(
            "timetable response contained no JSON object".into(),
        ));
    }

    let response: GvizResponse = serde_json::from_str(&raw[start..=end])
        .map_err(|e| AttendanceError::SourceUnavailable(format!("malformed timetable: {e}")))?;

    if response.status.as_deref() == Some("error") {
        let detail = response
            .errors
            .into_iter()
            .next()
            .and_then(|e| e.detailed_message.or(e.message))
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(AttendanceError::SourceData(format!(
            "Google Sheet Error: {detail}"
        )));
    }

    response.table.ok_or_else(|| {
        AttendanceError::SourceUnavailable("timetable response has no table".into())
    })
}

/// Splits a sheet into per-weekday slot lists, Monday first. Slots are normalized and merged.
pub fn extract_timetable(table: &GvizTable) -> [Vec<Slot>; 7] {
    let mut week: [Vec<Slot>; 7] = Default::default();

    for column in table.cols.iter().skip(1).take(SLOT_COLUMNS) {
        let mut positions = column.label.split(' ');
        let Some(range) = positions.next() else {
            continue;
        };
        let Some((from, to)) = range
            .split_once('-')
            .and_then(|(from, to)| Some((normalize_time(from)?, normalize_time(to)?)))
        else {
            if !column.label.trim().is_empty() {
                warn!(label = %column.label, "skipping column with unreadable time range");
            }
            continue;
        };

        for (day, code) in positions.take(7).enumerate() {
            let code = code.trim();
            if code.is_empty() {
                continue;
            }

            let Some(course_name) = table
                .rows
                .iter()
                .find(|row| row.text(1).as_deref() == Some(code))
                .and_then(|row| row.text(0))
            else {
                debug!(code, "timetable code has no course lookup row");
                continue;
            };

            week[day].push(Slot {
                course_code: code.to_string(),
                course_name,
                from: from.clone(),
                to: to.clone(),
            });
        }
    }

    week.map(merge_adjacent)
}

/// Timetable backed by the Google Visualization (`gviz`) JSON endpoint of a spreadsheet.
#[derive(Debug, Clone)]
pub struct GvizTimetable {
    client: reqwest::Client,
    base_url: String,
    sheet_id: String,
}

impl GvizTimetable {
    pub fn new(
        base_url: impl Into<String>,
        sheet_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AttendanceError::SourceUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sheet_id: sheet_id.into(),
        })
    }

    fn url(&self, semester: i32, branch: &str) -> Result<reqwest::Url> {
        let select = semester_columns(semester)?
            .iter()
            .map(|col| format!("`{col}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();

        reqwest::Url::parse_with_params(
            &format!("{}/spreadsheets/d/{}/gviz/tq", self.base_url, self.sheet_id),
            &[
                ("tqx", "out:json"),
                ("tq", &format!("SELECT {select}")),
                ("sheet", branch),
                ("t", &cache_buster),
            ],
        )
        .map_err(|e| AttendanceError::SourceUnavailable(format!("invalid timetable url: {e}")))
    }
}

#[async_trait]
impl TimetableSource for GvizTimetable {
    async fn fetch_slots(
        &self,
        semester: i32,
        branch: &str,
        weekday: Weekday,
    ) -> Result<Vec<Slot>> {
        let url = self.url(semester, branch)?;
        debug!(semester, branch, %weekday, "fetching timetable");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttendanceError::SourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AttendanceError::SourceUnavailable(format!(
                "timetable responded with {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttendanceError::SourceUnavailable(e.to_string()))?;

        let table = parse_gviz_payload(&body)?;
        let mut week = extract_timetable(&table);
        Ok(std::mem::take(&mut week[weekday.num_days_from_monday() as usize]))
    }
}

/// An in-memory timetable, keyed by `(semester, branch, weekday)`.
#[derive(Debug, Default, Clone)]
pub struct StaticTimetable {
    slots: HashMap<(i32, String, Weekday), Vec<Slot>>,
    outage: Option<String>,
}

impl StaticTimetable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timetable whose every fetch fails with [`AttendanceError::SourceUnavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            outage: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_slots(
        mut self,
        semester: i32,
        branch: &str,
        weekday: Weekday,
        slots: Vec<Slot>,
    ) -> Self {
        let slots = slots
            .into_iter()
            .filter_map(|slot| {
                Some(Slot {
                    from: normalize_time(&slot.from)?,
                    to: normalize_time(&slot.to)?,
                    ..slot
                })
            })
            .collect();
        self.slots.insert(
            (semester, branch.to_ascii_uppercase(), weekday),
            merge_adjacent(slots),
        );
        self
    }
}

#[async_trait]
impl TimetableSource for StaticTimetable {
    async fn fetch_slots(
        &self,
        semester: i32,
        branch: &str,
        weekday: Weekday,
    ) -> Result<Vec<Slot>> {
        if let Some(reason) = &self.outage {
            return Err(AttendanceError::SourceUnavailable(reason.clone()));
        }
        Ok(self
            .slots
            .get(&(semester, branch.to_ascii_uppercase(), weekday))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(code: &str, from: &str, to: &str) -> Slot {
        Slot {
            course_code: code.into(),
            course_name: format!("{code} name"),
            from: from.into(),
            to: to.into(),
        }
    }

    #[test]
    fn column_names_follow_spreadsheet_order() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(98), "CU");
    }

    #[test]
    fn semester_blocks_are_thirteen_columns_wide() {
        let second = semester_columns(2).unwrap();
        assert_eq!(second.first().map(String::as_str), Some("O"));
        assert_eq!(second.last().map(String::as_str), Some("AA"));

        let eighth = semester_columns(8).unwrap();
        assert_eq!(eighth.first().map(String::as_str), Some("CU"));
        assert_eq!(eighth.last().map(String::as_str), Some("DG"));

        assert!(semester_columns(0).is_err());
        assert!(semester_columns(11).is_err());
    }

    #[test]
    fn normalizes_times() {
        assert_eq!(normalize_time("9:00").as_deref(), Some("09:00"));
        assert_eq!(normalize_time("14:30").as_deref(), Some("14:30"));
        assert_eq!(normalize_time("25:00"), None);
        assert_eq!(normalize_time("noon"), None);
    }

    #[test]
    fn merges_contiguous_periods_of_one_course() {
        let merged = merge_adjacent(vec![
            slot("CS101", "09:00", "10:00"),
            slot("CS101", "10:00", "11:00"),
            slot("MA101", "11:00", "12:00"),
        ]);

        assert_eq!(
            merged,
            vec![slot("CS101", "09:00", "11:00"), slot("MA101", "11:00", "12:00")]
        );
    }

    #[test]
    fn does_not_merge_across_a_gap() {
        let merged = merge_adjacent(vec![
            slot("CS101", "09:00", "10:00"),
            slot("CS101", "11:00", "12:00"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    const PAYLOAD: &str = r#"/*O_o*/
google.visualization.Query.setResponse({"version":"0.6","status":"ok","table":{
  "cols":[
    {"id":"A","label":"","type":"string"},
    {"id":"B","label":"9:00-10:00 CS101 MA101","type":"string"},
    {"id":"C","label":"10:00-11:00 CS101  MA101","type":"string"},
    {"id":"D","label":"11:00-12:00 XX999 CS101","type":"string"},
    {"id":"E","label":"","type":"string"}
  ],
  "rows":[
    {"c":[{"v":"Programming"},{"v":"CS101"}]},
    {"c":[{"v":"Calculus"},{"v":"MA101"}]},
    {"c":[null,{"v":"XX999"}]}
  ]}});"#;

    #[test]
    fn extracts_weekdays_from_column_labels() {
        let table = parse_gviz_payload(PAYLOAD).unwrap();
        let week = extract_timetable(&table);

        // Monday: CS101 for two periods, then an unnamed code that is dropped.
        assert_eq!(week[0].len(), 1);
        assert_eq!(week[0][0].course_name, "Programming");
        assert_eq!((week[0][0].from.as_str(), week[0][0].to.as_str()), ("09:00", "11:00"));

        // Tuesday: MA101 at nine, nothing at ten (empty position), CS101 at eleven.
        let tuesday: Vec<_> = week[1]
            .iter()
            .map(|s| (s.course_code.as_str(), s.from.as_str()))
            .collect();
        assert_eq!(tuesday, vec![("MA101", "09:00"), ("CS101", "11:00")]);

        // Wednesday: MA101 from the third position of the ten o'clock label.
        assert_eq!(week[2][0].course_code, "MA101");
        assert_eq!(week[2][0].from, "10:00");

        assert!(week[3..].iter().all(Vec::is_empty));
    }

    #[test]
    fn sheet_errors_are_data_errors() {
        let raw = r#"google.visualization.Query.setResponse({"status":"error","errors":[{"reason":"invalid_query","message":"INVALID_QUERY","detailed_message":"Invalid column: DH"}]});"#;
        let err = parse_gviz_payload(raw).unwrap_err();
        assert_eq!(err.kind(), "source_data_error");
        assert!(err.to_string().contains("Invalid column: DH"));
    }

    #[test]
    fn garbage_is_unavailable() {
        assert_eq!(
            parse_gviz_payload("<html>502</html>").unwrap_err().kind(),
            "source_unavailable"
        );
        assert_eq!(
            parse_gviz_payload("setResponse({\"status\":").unwrap_err().kind(),
            "source_unavailable"
        );
    }

    #[tokio::test]
    async fn static_timetable_merges_and_pads() {
        let source = StaticTimetable::new().with_slots(
            3,
            "cse",
            Weekday::Mon,
            vec![slot("CS101", "9:00", "10:00"), slot("CS101", "10:00", "11:00")],
        );

        let slots = source.fetch_slots(3, "CSE", Weekday::Mon).await.unwrap();
        assert_eq!(slots, vec![slot("CS101", "09:00", "11:00")]);
        assert!(source.fetch_slots(3, "CSE", Weekday::Tue).await.unwrap().is_empty());

        let down = StaticTimetable::unavailable("offline");
        assert_eq!(
            down.fetch_slots(3, "CSE", Weekday::Mon).await.unwrap_err().kind(),
            "source_unavailable"
        );
    }
}
