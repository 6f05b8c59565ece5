use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing::{info, warn};

use crate::config::Config;
use crate::course::CourseScraper;
use crate::extract::{extract_file, extract_folder};
use crate::lessons::{filter_csv_file, read_api_keys, read_id_list, read_lessons, select_lessons};
use crate::macros::secs_since;
use crate::process::{log_plan, BatchRunner};
use crate::report::{write_reports, RunStats};
use crate::request::FirecrawlClient;
use crate::{Error, Result};

/// Course package scraper
#[derive(Parser)]
#[command(name = "coursescrap")]
#[command(
    about = "Downloads course packages through a scraping API and unpacks their images",
    long_about = None
)]
pub struct Cli {
    /// TOML config file; `coursescrap.toml` is used when present
    #[arg(short, long, global = true, env = "COURSESCRAP_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory course folders are created in
    #[arg(long, global = true)]
    pub output_root: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape a single course from its imsmanifest.xml URL
    Scrape {
        url: String,
        #[arg(short = 'k', long, env = "FIRECRAWL_API_KEY", hide_env_values = true)]
        api_key: String,
        /// Image cache names to guess when the manifest lists none
        #[arg(long)]
        fallback_count: Option<usize>,
    },
    /// Extract images from one image cache file
    Extract {
        json_file: PathBuf,
        output_dir: PathBuf,
    },
    /// Extract images from every dr_img*.json in a course's JSON folder
    ExtractAll { json_dir: PathBuf },
    /// Keep only the CSV rows whose lessonID is in the ID list
    Filter {
        ids: PathBuf,
        csv: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Scrape many courses in parallel, one API key per worker
    Batch {
        /// Lesson CSV (lessonID, lessonname, link, courseid, coursename)
        csv: PathBuf,
        /// API keys, one per line
        keys: PathBuf,
        /// Only scrape lessons listed in this file
        #[arg(long)]
        bad_list: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        /// Show what would be processed without scraping
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        max_workers: Option<usize>,
        /// Seconds to wait between batches
        #[arg(long)]
        batch_delay: Option<u64>,
        /// Where the results CSV and failed-module lists go
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(root) = &self.output_root {
            config.output_root = root.clone();
        }
        match &self.command {
            Commands::Scrape {
                fallback_count: Some(n),
                ..
            } => config.fallback_json_count = *n,
            Commands::Batch {
                max_workers,
                batch_delay,
                ..
            } => {
                if let Some(n) = max_workers {
                    config.max_workers = *n;
                }
                if let Some(secs) = batch_delay {
                    config.batch_delay_secs = *secs;
                }
            }
            _ => {}
        }
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Commands::Scrape { url, api_key, .. } => scrape(config, &url, api_key).await,
            Commands::Extract {
                json_file,
                output_dir,
            } => {
                let stats = extract_file(&json_file, &output_dir, config.min_image_bytes)?;
                info!(
                    found = stats.found,
                    extracted = stats.extracted,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    output = %output_dir.display(),
                    "Successfully extracted {} images",
                    stats.extracted
                );
                Ok(())
            }
            Commands::ExtractAll { json_dir } => {
                let stats = extract_folder(&json_dir, config.min_image_bytes)?;
                info!(
                    "EXTRACTION COMPLETE: processed {}/{} files, {} images saved to {}",
                    stats.processed,
                    stats.files,
                    stats.images,
                    stats.output_dir.display()
                );
                if stats.processed == 0 {
                    return Err(Error::NothingToDo("no image cache could be processed".into()));
                }
                Ok(())
            }
            Commands::Filter { ids, csv, output } => filter(&ids, &csv, output),
            Commands::Batch {
                csv,
                keys,
                bad_list,
                limit,
                dry_run,
                report_dir,
                ..
            } => {
                let job = BatchJob {
                    csv,
                    keys,
                    bad_list,
                    limit,
                    dry_run,
                    report_dir,
                };
                batch(config, job).await
            }
        }
    }
}

async fn scrape(config: Config, url: &str, api_key: String) -> Result<()> {
    if !url.ends_with(crate::parse::MANIFEST_FILE) {
        warn!(url, "URL doesn't end with imsmanifest.xml");
    }
    let fetcher = FirecrawlClient::new(Client::new(), api_key, &config);
    let summary = CourseScraper::new(fetcher, Arc::new(config)).process(url).await?;
    info!(
        folder = %summary.folder,
        json = %format!("{}/{}", summary.json_ok, summary.json_total),
        images = summary.images,
        assets = summary.assets_ok,
        "SCRAPING COMPLETED"
    );
    Ok(())
}

fn filter(ids_path: &Path, csv_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let ids = read_id_list(ids_path)?;
    if ids.is_empty() {
        return Err(Error::NothingToDo(format!(
            "no lesson IDs in {}",
            ids_path.display()
        )));
    }
    let (written, report) = filter_csv_file(csv_path, &ids, output, Local::now().timestamp())?;
    info!(
        total_rows = report.total_rows,
        requested = ids.len(),
        matched = report.matched,
        "EXTRACTION SUMMARY"
    );
    if !report.missing.is_empty() {
        warn!(
            count = report.missing.len(),
            first = ?&report.missing[..report.missing.len().min(10)],
            "lesson IDs not found in CSV"
        );
    }
    match written {
        Some(path) => {
            info!(path = %path.display(), rows = report.matched, "saved filtered CSV");
            Ok(())
        }
        None => Err(Error::NothingToDo("no matching rows".into())),
    }
}

struct BatchJob {
    csv: PathBuf,
    keys: PathBuf,
    bad_list: Option<PathBuf>,
    limit: Option<usize>,
    dry_run: bool,
    report_dir: PathBuf,
}

async fn batch(config: Config, job: BatchJob) -> Result<()> {
    let lessons = match &job.bad_list {
        Some(list) => {
            let ids = read_id_list(list)?;
            select_lessons(File::open(&job.csv)?, &ids, job.limit)?.lessons
        }
        None => read_lessons(File::open(&job.csv)?, job.limit)?,
    };
    if lessons.is_empty() {
        return Err(Error::NothingToDo(format!(
            "no lessons to scrape from {}",
            job.csv.display()
        )));
    }
    let keys = read_api_keys(&job.keys)?;
    if let Some(limit) = job.limit {
        info!(limit, "TESTING MODE: limited run");
    }

    let config = Arc::new(config);
    let client = Client::new();
    // reqwest clients share their pool across clones
    let runner = BatchRunner::new(
        |key: &str| FirecrawlClient::new(client.clone(), key, &config),
        keys.clone(),
        config.clone(),
    )?;
    let plan = runner.plan(lessons.len());
    log_plan(&lessons, &keys, plan, config.key_preview_chars);
    if job.dry_run {
        info!("DRY RUN: nothing was scraped");
        return Ok(());
    }

    let start_time = Local::now();
    let results = runner.run(&lessons).await;
    let stats = RunStats::compute(&results, secs_since(start_time));
    stats.log();

    let prefix = if job.bad_list.is_some() {
        "bad_modules"
    } else {
        "scraping"
    };
    let files = write_reports(&job.report_dir, &results, prefix, job.limit, Local::now())?;
    if let Some(ids) = files.failed_ids {
        warn!(
            failed = stats.failed,
            retry_list = %ids.display(),
            "some courses failed, pass the retry list as --bad-list to run them again"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LESSONS_CSV: &str = "lessonID,lessonname,link,courseid,coursename
L1,One,https://h/c/l1/imsmanifest.xml,C,Course
";

    #[test]
    fn batch_flags_override_config() {
        let cli = Cli::parse_from([
            "coursescrap",
            "--output-root",
            "/tmp/out",
            "batch",
            "lessons.csv",
            "keys.txt",
            "--max-workers",
            "3",
            "--batch-delay",
            "0",
            "--dry-run",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.batch_delay_secs, 0);
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert!(matches!(cli.command, Commands::Batch { dry_run: true, .. }));
    }

    #[test]
    fn scrape_takes_key_flag() {
        let cli = Cli::parse_from([
            "coursescrap",
            "scrape",
            "https://h/c/imsmanifest.xml",
            "-k",
            "fc-abc",
            "--fallback-count",
            "5",
        ]);
        assert_eq!(cli.load_config().unwrap().fallback_json_count, 5);
        match cli.command {
            Commands::Scrape { api_key, .. } => assert_eq!(api_key, "fc-abc"),
            _ => panic!("expected scrape"),
        }
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("lessons.csv");
        std::fs::write(&csv, LESSONS_CSV).unwrap();
        let keys = dir.path().join("keys.txt");
        std::fs::write(&keys, "fc-1\nfc-2\n").unwrap();
        let reports = dir.path().join("reports");

        let job = BatchJob {
            csv,
            keys,
            bad_list: None,
            limit: None,
            dry_run: true,
            report_dir: reports.clone(),
        };
        let config = Config {
            output_root: dir.path().join("courses"),
            ..Config::default()
        };
        batch(config, job).await.unwrap();
        assert!(!reports.exists());
        assert!(!dir.path().join("courses").exists());
    }

    #[tokio::test]
    async fn batch_with_unmatched_bad_list_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("lessons.csv");
        std::fs::write(&csv, LESSONS_CSV).unwrap();
        let list = dir.path().join("bad.txt");
        std::fs::write(&list, "L2\n").unwrap();
        let job = BatchJob {
            csv,
            keys: dir.path().join("missing-keys.txt"),
            bad_list: Some(list),
            limit: None,
            dry_run: true,
            report_dir: dir.path().to_path_buf(),
        };
        let res = batch(Config::default(), job).await;
        assert!(matches!(res, Err(Error::NothingToDo(_))));
    }
}
