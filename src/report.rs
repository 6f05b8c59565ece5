use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::process::TaskResult;
use crate::Result;

/// Aggregate numbers for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_secs: f64,
    /// Mean duration of the successful tasks.
    pub avg_task_secs: Option<f64>,
    /// Sequential estimate divided by wall time.
    pub speedup: Option<f64>,
}

impl RunStats {
    pub fn compute(results: &[TaskResult], total_secs: f64) -> Self {
        let successful: Vec<&TaskResult> = results.iter().filter(|r| r.is_success()).collect();
        let avg_task_secs = (!successful.is_empty())
            .then(|| successful.iter().map(|r| r.duration).sum::<f64>() / successful.len() as f64);
        let speedup = avg_task_secs
            .filter(|_| total_secs > 0.0)
            .map(|avg| avg * results.len() as f64 / total_secs);
        Self {
            total: results.len(),
            successful: successful.len(),
            failed: results.len() - successful.len(),
            total_secs,
            avg_task_secs,
            speedup,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64 * 100.0
    }

    pub fn log(&self) {
        info!(
            "Successful: {}/{} ({:.1}%), failed: {}",
            self.successful,
            self.total,
            self.success_rate(),
            self.failed
        );
        info!(
            "Total processing time: {:.1}s ({:.1} minutes)",
            self.total_secs,
            self.total_secs / 60.0
        );
        if let (Some(avg), Some(speedup)) = (self.avg_task_secs, self.speedup) {
            info!("Average course time: {avg:.1}s, speedup {speedup:.1}x vs sequential");
        }
    }
}

fn sorted(results: &[TaskResult]) -> Vec<&TaskResult> {
    let mut sorted: Vec<&TaskResult> = results.iter().collect();
    sorted.sort_by_key(|r| (r.batch_num, r.worker_id));
    sorted
}

/// Results CSV, ordered by batch then worker.
pub fn write_results_csv<W: Write>(results: &[TaskResult], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for result in sorted(results) {
        csv.serialize(result)?;
    }
    csv.flush()?;
    Ok(())
}

/// The failed lesson IDs, one per line, readable back as an ID list.
pub fn write_failed_ids<W: Write>(
    results: &[TaskResult],
    generated: DateTime<Local>,
    mut writer: W,
) -> Result<()> {
    let mut failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.lesson_id.as_str())
        .collect();
    failed.sort_unstable();
    writeln!(writer, "# Failed modules")?;
    writeln!(writer, "# Generated: {}", generated.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(writer, "# Total failed: {}", failed.len())?;
    writeln!(writer, "# Use this file as the ID list of a new run to retry them")?;
    writeln!(writer)?;
    for id in failed {
        writeln!(writer, "{id}")?;
    }
    Ok(())
}

pub fn write_failed_details<W: Write>(
    results: &[TaskResult],
    generated: DateTime<Local>,
    mut writer: W,
) -> Result<()> {
    let mut failed: Vec<&TaskResult> = results.iter().filter(|r| !r.is_success()).collect();
    failed.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
    writeln!(writer, "# Detailed failure information")?;
    writeln!(writer, "# Generated: {}", generated.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(writer, "# Total failed: {}", failed.len())?;
    writeln!(writer)?;
    for r in failed {
        writeln!(writer, "Lesson ID: {}", r.lesson_id)?;
        writeln!(writer, "Course ID: {}", r.course_id)?;
        writeln!(writer, "Course Name: {}", r.course_name)?;
        writeln!(writer, "Batch: {}, Worker: {}", r.batch_num, r.worker_id)?;
        writeln!(writer, "Duration: {:.1}s", r.duration)?;
        writeln!(writer, "Error: {}", r.error)?;
        writeln!(writer, "{}", "-".repeat(80))?;
        writeln!(writer)?;
    }
    Ok(())
}

/// Files written at the end of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub results: PathBuf,
    pub failed_ids: Option<PathBuf>,
    pub failed_details: Option<PathBuf>,
}

/// `<prefix>_results_all_<ts>.csv`, or `..._test_<n>courses_<ts>.csv` for limited runs.
pub fn results_file_name(prefix: &str, limit: Option<usize>, timestamp: i64) -> String {
    match limit {
        Some(n) => format!("{prefix}_results_test_{n}courses_{timestamp}.csv"),
        None => format!("{prefix}_results_all_{timestamp}.csv"),
    }
}

/// Writes the results CSV into `dir`, plus the failed-ID list and details when anything failed.
pub fn write_reports(
    dir: &Path,
    results: &[TaskResult],
    prefix: &str,
    limit: Option<usize>,
    now: DateTime<Local>,
) -> Result<ReportFiles> {
    std::fs::create_dir_all(dir)?;
    let timestamp = now.timestamp();
    let results_path = dir.join(results_file_name(prefix, limit, timestamp));
    write_results_csv(results, BufWriter::new(File::create(&results_path)?))?;
    info!(path = %results_path.display(), "saved results");

    let mut files = ReportFiles {
        results: results_path,
        failed_ids: None,
        failed_details: None,
    };
    if results.iter().all(TaskResult::is_success) {
        return Ok(files);
    }

    let ids_path = dir.join(format!("failed_modules_{timestamp}.txt"));
    let mut ids_file = BufWriter::new(File::create(&ids_path)?);
    write_failed_ids(results, now, &mut ids_file)?;
    ids_file.flush()?;

    let details_path = dir.join(format!("failed_modules_details_{timestamp}.txt"));
    let mut details_file = BufWriter::new(File::create(&details_path)?);
    write_failed_details(results, now, &mut details_file)?;
    details_file.flush()?;

    info!(
        ids = %ids_path.display(),
        details = %details_path.display(),
        "saved failed modules"
    );
    files.failed_ids = Some(ids_path);
    files.failed_details = Some(details_path);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::lessons::parse_id_list;
    use crate::process::Status;

    fn result(batch: usize, worker: usize, id: &str, ok: bool, duration: f64) -> TaskResult {
        TaskResult {
            batch_num: batch,
            worker_id: worker,
            lesson_id: id.into(),
            course_id: "C9".into(),
            course_name: "Nine, Inc".into(),
            status: if ok { Status::Success } else { Status::Failed },
            duration,
            api_key: "fc-1...".into(),
            error: if ok { String::new() } else { "boom".into() },
        }
    }

    fn now() -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn stats_compute_speedup() {
        let results = vec![
            result(1, 1, "a", true, 10.0),
            result(1, 2, "b", true, 20.0),
            result(1, 3, "c", false, 1.0),
        ];
        let stats = RunStats::compute(&results, 15.0);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.avg_task_secs, Some(15.0));
        assert_eq!(stats.speedup, Some(3.0));
        assert!((stats.success_rate() - 66.666).abs() < 0.01);

        let none = RunStats::compute(&[result(1, 1, "x", false, 1.0)], 2.0);
        assert_eq!(none.avg_task_secs, None);
        assert_eq!(none.speedup, None);
    }

    #[test]
    fn results_csv_is_sorted_with_fixed_columns() {
        let results = vec![
            result(2, 1, "c", true, 1.5),
            result(1, 2, "b", false, 2.0),
            result(1, 1, "a", true, 3.0),
        ];
        let mut out = Vec::new();
        write_results_csv(&results, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "batch_num,worker_id,lesson_id,course_id,course_name,status,duration,api_key,error"
        );
        assert_eq!(lines[1], "1,1,a,C9,\"Nine, Inc\",success,3.0,fc-1...,");
        assert_eq!(lines[2], "1,2,b,C9,\"Nine, Inc\",failed,2.0,fc-1...,boom");
        assert!(lines[3].starts_with("2,1,c,"));
    }

    #[test]
    fn failed_ids_round_trip_as_id_list() {
        let results = vec![
            result(1, 1, "zeta", false, 1.0),
            result(1, 2, "ok", true, 1.0),
            result(1, 3, "alpha", false, 1.0),
        ];
        let mut out = Vec::new();
        write_failed_ids(&results, now(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(parse_id_list(&text), vec!["alpha", "zeta"]);
    }

    #[test]
    fn reports_only_list_failures_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_reports(
            dir.path(),
            &[result(1, 1, "a", true, 1.0)],
            "scraping",
            Some(1),
            now(),
        )
        .unwrap();
        assert_eq!(
            files.results,
            dir.path().join("scraping_results_test_1courses_1700000000.csv")
        );
        assert!(files.failed_ids.is_none());

        let files = write_reports(
            dir.path(),
            &[result(1, 1, "a", false, 1.0)],
            "bad_modules",
            None,
            now(),
        )
        .unwrap();
        assert!(files.results.ends_with("bad_modules_results_all_1700000000.csv"));
        let details = std::fs::read_to_string(files.failed_details.unwrap()).unwrap();
        assert!(details.contains("Lesson ID: a"));
        assert!(details.contains("Error: boom"));
        assert!(files.failed_ids.unwrap().exists());
    }
}
