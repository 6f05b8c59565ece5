use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::course::CourseScraper;
use crate::lessons::LessonRecord;
use crate::macros::secs_since;
use crate::request::Fetcher;
use crate::{info_time, Error, Result};

/// How many lessons are listed when a plan is printed.
const PLAN_PREVIEW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// Outcome of scraping one lesson, as written to the results CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub batch_num: usize,
    pub worker_id: usize,
    pub lesson_id: String,
    pub course_id: String,
    pub course_name: String,
    pub status: Status,
    /// Seconds.
    pub duration: f64,
    pub api_key: String,
    pub error: String,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Splits `tasks` lessons into batches of at most one lesson per key (and per worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub total_batches: usize,
}

impl BatchPlan {
    pub fn new(tasks: usize, key_count: usize, max_workers: usize) -> Self {
        let batch_size = key_count.min(max_workers).max(1);
        Self {
            batch_size,
            total_batches: tasks.div_ceil(batch_size),
        }
    }
}

/// Static round-robin: task `index` always uses key `index mod key_count`.
pub fn key_for(index: usize, keys: &[String]) -> Option<&str> {
    keys.get(index % keys.len().max(1)).map(String::as_str)
}

pub fn mask_key(key: &str, chars: usize) -> String {
    format!("{}...", key.chars().take(chars).collect::<String>())
}

pub fn truncate_error(msg: &str, max_chars: usize) -> String {
    msg.chars().take(max_chars).collect()
}

/// Logs which key each of the first few lessons will get.
pub fn log_plan(lessons: &[LessonRecord], keys: &[String], plan: BatchPlan, key_chars: usize) {
    info!(
        lessons = lessons.len(),
        keys = keys.len(),
        batch_size = plan.batch_size,
        total_batches = plan.total_batches,
        "batch plan"
    );
    for (i, lesson) in lessons.iter().take(PLAN_PREVIEW).enumerate() {
        info!(
            "{:>3}. {} - {} -> {}",
            i + 1,
            lesson.lesson_id,
            lesson.lesson_name,
            mask_key(key_for(i, keys).unwrap_or_default(), key_chars)
        );
    }
    if lessons.len() > PLAN_PREVIEW {
        info!("... and {} more", lessons.len() - PLAN_PREVIEW);
    }
}

/// Runs course scrapes in fixed-size batches, one API key per concurrent task.
pub struct BatchRunner<M> {
    make_fetcher: M,
    keys: Vec<String>,
    config: Arc<Config>,
}

impl<M, F> BatchRunner<M>
where
    M: Fn(&str) -> F,
    F: Fetcher + 'static,
{
    pub fn new(make_fetcher: M, keys: Vec<String>, config: Arc<Config>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::NoApiKeys);
        }
        Ok(Self {
            make_fetcher,
            keys,
            config,
        })
    }

    pub fn plan(&self, tasks: usize) -> BatchPlan {
        BatchPlan::new(tasks, self.keys.len(), self.config.max_workers)
    }

    /// Scrapes every lesson. Failures are recorded, never propagated, so the returned
    /// list always has one entry per lesson.
    pub async fn run(&self, lessons: &[LessonRecord]) -> Vec<TaskResult> {
        let plan = self.plan(lessons.len());
        let start_time = Local::now();
        let mut results = Vec::with_capacity(lessons.len());

        for (batch_idx, batch) in lessons.chunks(plan.batch_size).enumerate() {
            let batch_num = batch_idx + 1;
            let first_index = batch_idx * plan.batch_size;
            let batch_results = self.run_batch(batch, first_index, batch_num, plan).await;
            results.extend(batch_results);

            info!(
                "OVERALL PROGRESS: {}/{} courses ({:.1}%)",
                results.len(),
                lessons.len(),
                results.len() as f64 / lessons.len() as f64 * 100.0
            );
            if batch_num < plan.total_batches && !self.config.batch_delay().is_zero() {
                info!(
                    secs = self.config.batch_delay_secs,
                    "waiting before next batch to respect rate limits"
                );
                tokio::time::sleep(self.config.batch_delay()).await;
            }
        }
        info_time!(start_time, "Processed {} courses", results.len());
        results
    }

    async fn run_batch(
        &self,
        batch: &[LessonRecord],
        first_index: usize,
        batch_num: usize,
        plan: BatchPlan,
    ) -> Vec<TaskResult> {
        let start_time = Local::now();
        info!(
            "PROCESSING BATCH {batch_num}/{}: {} courses",
            plan.total_batches,
            batch.len()
        );

        let handles: Vec<(TaskResult, JoinHandle<TaskResult>)> = batch
            .iter()
            .enumerate()
            .map(|(i, lesson)| {
                let key = key_for(first_index + i, &self.keys).unwrap_or_default();
                let pending = TaskResult {
                    batch_num,
                    worker_id: i + 1,
                    lesson_id: lesson.lesson_id.clone(),
                    course_id: lesson.course_id.clone(),
                    course_name: lesson.course_name.clone(),
                    status: Status::Failed,
                    duration: 0.0,
                    api_key: mask_key(key, self.config.key_preview_chars),
                    error: String::new(),
                };
                let scraper = CourseScraper::new((self.make_fetcher)(key), self.config.clone());
                let handle = tokio::spawn({
                    let pending = pending.clone();
                    let link = lesson.link.clone();
                    let max_chars = self.config.error_max_chars;
                    async move { scrape_single(scraper, pending, link, max_chars).await }
                });
                (pending, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (pending, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(lesson_id = %pending.lesson_id, %e, "worker task died");
                    TaskResult {
                        error: truncate_error(&e.to_string(), self.config.error_max_chars),
                        ..pending
                    }
                }
            };
            results.push(result);
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        info_time!(
            start_time,
            "BATCH {batch_num} SUMMARY: {ok}/{} successful, {} failed",
            results.len(),
            results.len() - ok
        );
        for failed in results.iter().filter(|r| !r.is_success()) {
            warn!(lesson_id = %failed.lesson_id, error = %failed.error, "failed course");
        }
        results
    }
}

async fn scrape_single<F: Fetcher>(
    scraper: CourseScraper<F>,
    mut result: TaskResult,
    link: String,
    max_chars: usize,
) -> TaskResult {
    let start_time = Local::now();
    info!(
        batch = result.batch_num,
        worker = result.worker_id,
        lesson_id = %result.lesson_id,
        api_key = %result.api_key,
        url = %link,
        "starting"
    );
    let outcome: Result<_> = scraper.process(&link).await;
    result.duration = secs_since(start_time);
    match outcome {
        Ok(summary) => {
            info!(
                batch = result.batch_num,
                worker = result.worker_id,
                lesson_id = %result.lesson_id,
                images = summary.images,
                "COMPLETED in {:.1}s",
                result.duration
            );
            result.status = Status::Success;
        }
        Err(e) => {
            result.error = truncate_error(&e.to_string(), max_chars);
            error!(
                batch = result.batch_num,
                worker = result.worker_id,
                lesson_id = %result.lesson_id,
                error = %result.error,
                "FAILED in {:.1}s",
                result.duration
            );
        }
    }
    result
}
