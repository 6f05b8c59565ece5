//! Lesson CSVs and the plain-text ID / key lists that drive a batch.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

pub const LESSON_ID_COLUMN: &str = "lessonID";

/// One row of the master lesson CSV. Columns beyond these are ignored here and kept
/// verbatim by [`filter_csv`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRecord {
    #[serde(rename = "lessonID")]
    pub lesson_id: String,
    #[serde(rename = "lessonname", default)]
    pub lesson_name: String,
    pub link: String,
    #[serde(rename = "courseid", default)]
    pub course_id: String,
    #[serde(rename = "coursename", default)]
    pub course_name: String,
}

/// Lessons picked out of a CSV by ID, plus the requested IDs that never showed up.
#[derive(Debug, Default)]
pub struct Selection {
    pub lessons: Vec<LessonRecord>,
    pub missing: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub total_rows: usize,
    pub matched: usize,
    pub missing: Vec<String>,
}

/// One ID per line. Blank lines and `#` comments are dropped, order is kept.
pub fn parse_id_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let ids = parse_id_list(&fs::read_to_string(path)?);
    info!(path = %path.display(), count = ids.len(), "loaded lesson IDs");
    Ok(ids)
}

pub fn read_api_keys(path: &Path) -> Result<Vec<String>> {
    let keys: Vec<String> = fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if keys.is_empty() {
        return Err(Error::NoApiKeys);
    }
    info!(count = keys.len(), "loaded API keys");
    Ok(keys)
}

/// All lessons in CSV order, or the first `limit` of them.
pub fn read_lessons<R: Read>(reader: R, limit: Option<usize>) -> Result<Vec<LessonRecord>> {
    let mut csv = csv::Reader::from_reader(reader);
    csv.deserialize::<LessonRecord>()
        .take(limit.unwrap_or(usize::MAX))
        .map(|row| row.map_err(Error::from))
        .collect()
}

/// Lessons whose ID is in `ids`, in CSV order. `limit` caps the number of matches.
pub fn select_lessons<R: Read>(
    reader: R,
    ids: &[String],
    limit: Option<usize>,
) -> Result<Selection> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut not_found: BTreeSet<&str> = wanted.iter().copied().collect();
    let limit = limit.unwrap_or(usize::MAX);

    let mut lessons = Vec::new();
    let mut csv = csv::Reader::from_reader(reader);
    for row in csv.deserialize::<LessonRecord>() {
        let mut lesson = row?;
        lesson.lesson_id = lesson.lesson_id.trim().to_string();
        if !wanted.contains(lesson.lesson_id.as_str()) {
            continue;
        }
        if lessons.len() >= limit {
            break;
        }
        not_found.remove(lesson.lesson_id.as_str());
        lessons.push(lesson);
    }

    let missing: Vec<String> = not_found.into_iter().map(String::from).collect();
    if !missing.is_empty() {
        warn!(
            count = missing.len(),
            first = ?&missing[..missing.len().min(10)],
            "lesson IDs not found in CSV"
        );
    }
    Ok(Selection { lessons, missing })
}

/// Copies the header and every row whose (trimmed) lessonID is in `ids` from `reader`
/// to `writer`. Row order and all columns are preserved. Nothing is written when no row
/// matches.
pub fn filter_csv<R: Read, W: Write>(
    reader: R,
    ids: &[String],
    writer: W,
) -> Result<FilterReport> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut csv = csv::Reader::from_reader(reader);
    let headers = csv.headers()?.clone();
    let id_column = headers
        .iter()
        .position(|h| h.trim() == LESSON_ID_COLUMN)
        .ok_or(Error::MissingColumn(LESSON_ID_COLUMN))?;

    let mut report = FilterReport::default();
    let mut found = HashSet::new();
    let mut rows = Vec::new();
    for row in csv.records() {
        let row = row?;
        report.total_rows += 1;
        let id = row.get(id_column).unwrap_or_default().trim();
        if wanted.contains(id) {
            found.insert(id.to_string());
            rows.push(row);
        }
    }
    report.matched = rows.len();
    report.missing = wanted
        .iter()
        .filter(|id| !found.contains(**id))
        .map(|id| id.to_string())
        .collect();
    report.missing.sort();

    if rows.is_empty() {
        return Ok(report);
    }
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&headers)?;
    for row in &rows {
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(report)
}

pub fn default_filtered_name(matched: usize, timestamp: i64) -> PathBuf {
    PathBuf::from(format!("bad_modules_filtered_{matched}courses_{timestamp}.csv"))
}

/// File-level wrapper around [`filter_csv`]. Returns where the output went, if anywhere.
pub fn filter_csv_file(
    input: &Path,
    ids: &[String],
    output: Option<PathBuf>,
    timestamp: i64,
) -> Result<(Option<PathBuf>, FilterReport)> {
    let mut buf = Vec::new();
    let report = filter_csv(fs::File::open(input)?, ids, &mut buf)?;
    if report.matched == 0 {
        return Ok((None, report));
    }
    let output = output.unwrap_or_else(|| default_filtered_name(report.matched, timestamp));
    fs::write(&output, buf)?;
    Ok((Some(output), report))
}
