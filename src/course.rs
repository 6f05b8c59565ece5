use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::extract::{extract_folder, IMAGES_DIR};
use crate::parse::{
    base_url, discover_json_files, fallback_json_files, folder_name, format_javascript,
    safe_file_name,
};
use crate::request::{Fetcher, ScrapedPage};
use crate::{info_time, Error, Result};

pub const JSON_DIR: &str = "JSON";
const MANIFEST_STEM: &str = "imsmanifest";
/// Relative asset path and the file name it is saved under.
const FIXED_ASSETS: [(&str, &str); 2] = [
    ("assets/js/CPM.js", "CPM.js"),
    ("project.txt", "project.txt"),
];
const FAILED_PREVIEW: usize = 5;

/// On-disk folders of one course.
#[derive(Debug, Clone)]
pub struct CourseLayout {
    pub root: PathBuf,
    pub json: PathBuf,
    pub images: PathBuf,
}

impl CourseLayout {
    pub fn create(output_root: &Path, folder: &str) -> Result<Self> {
        let root = output_root.join(folder);
        let layout = Self {
            json: root.join(JSON_DIR),
            images: root.join(IMAGES_DIR),
            root,
        };
        fs::create_dir_all(&layout.json)?;
        fs::create_dir_all(&layout.images)?;
        Ok(layout)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseSummary {
    pub folder: String,
    pub json_ok: usize,
    pub json_total: usize,
    pub images: usize,
    pub assets_ok: usize,
}

enum Fetched {
    Page(ScrapedPage),
    Raw,
}

/// Downloads one course package with a single fetcher (and so a single API key).
pub struct CourseScraper<F> {
    fetcher: F,
    config: Arc<Config>,
}

impl<F: Fetcher> CourseScraper<F> {
    pub fn new(fetcher: F, config: Arc<Config>) -> Self {
        Self { fetcher, config }
    }

    /// Runs the whole course flow for a manifest URL.
    ///
    /// Only a failed manifest fetch is an error. Missing image caches, extraction problems
    /// and missing assets are logged and reflected in the summary.
    pub async fn process(&self, manifest_url: &str) -> Result<CourseSummary> {
        let start_time = Local::now();
        let folder = folder_name(manifest_url);
        let base = Url::parse(&base_url(manifest_url))?;
        info!(manifest_url, %folder, %base, "processing course");

        let layout = CourseLayout::create(&self.config.output_root, &folder)?;

        let manifest = self.scrape_and_save(manifest_url, &layout.root.join(MANIFEST_STEM)).await?;
        let mut json_files =
            discover_json_files(manifest.markdown.as_deref(), manifest.html.as_deref());
        if json_files.is_empty() {
            warn!(
                count = self.config.fallback_json_count,
                "no JSON files in manifest, using fallback names"
            );
            json_files = fallback_json_files(self.config.fallback_json_count);
        } else {
            info!(count = json_files.len(), files = ?json_files, "found JSON files in manifest");
        }

        let mut summary = CourseSummary {
            folder,
            json_total: json_files.len(),
            ..Default::default()
        };
        let mut failed = Vec::new();
        for (i, json_file) in json_files.iter().enumerate() {
            info!("JSON file {}/{}: {json_file}", i + 1, summary.json_total);
            match self.fetch_json(&base, json_file, &layout.json).await {
                Ok(()) => summary.json_ok += 1,
                Err(e) => {
                    warn!(%json_file, %e, "couldn't fetch JSON file");
                    failed.push(json_file.as_str());
                }
            }
        }
        info!(ok = summary.json_ok, total = summary.json_total, "scraped JSON files");
        if !failed.is_empty() {
            warn!(
                count = failed.len(),
                first = ?&failed[..failed.len().min(FAILED_PREVIEW)],
                "failed JSON files"
            );
        }

        summary.images = self.run_image_extractor(&layout.json).await;

        for (relative, file_name) in FIXED_ASSETS {
            let url = base.join(relative)?;
            match self.fetch_to(url.as_str(), &layout.root.join(file_name)).await {
                Ok(_) => {
                    info!(file_name, "saved asset");
                    summary.assets_ok += 1;
                }
                Err(e) => error!(file_name, %e, "couldn't fetch asset"),
            }
        }

        info_time!(
            start_time,
            "Finished course {}: {}/{} JSON files, {} images",
            summary.folder,
            summary.json_ok,
            summary.json_total,
            summary.images
        );
        Ok(summary)
    }

    /// Scrapes `url` through the API and writes the `.md`, `.html` and `.metadata.json`
    /// renditions next to `stem`.
    async fn scrape_and_save(&self, url: &str, stem: &Path) -> Result<ScrapedPage> {
        let page = self.fetcher.scrape(url).await?;
        save_page(&page, stem)?;
        Ok(page)
    }

    /// Fetches `url` into `output`, downloading it raw when its extension is configured so.
    async fn fetch_to(&self, url: &str, output: &Path) -> Result<Fetched> {
        if !self.config.is_raw_asset(url) {
            return Ok(Fetched::Page(self.scrape_and_save(url, output).await?));
        }
        let mut content = self.fetcher.download(url).await?;
        if url.to_lowercase().ends_with(".js") {
            content = format_javascript(&content);
        }
        fs::write(output, content)?;
        Ok(Fetched::Raw)
    }

    async fn fetch_json(&self, base: &Url, json_file: &str, json_dir: &Path) -> Result<()> {
        let url = base.join(json_file)?;
        let output = json_dir.join(safe_file_name(json_file));
        let Fetched::Page(page) = self.fetch_to(url.as_str(), &output).await? else {
            return Ok(());
        };
        match page.payload()? {
            Some(payload) => write_json_payload(&payload, &output.with_extension("json")),
            None => Err(Error::ScrapeEmpty(url.to_string())),
        }
    }

    /// Extracts images from everything fetched into `json_dir`. Returns how many were written.
    async fn run_image_extractor(&self, json_dir: &Path) -> usize {
        let json_dir = json_dir.to_path_buf();
        let min_bytes = self.config.min_image_bytes;
        let outcome = spawn_blocking(move || extract_folder(&json_dir, min_bytes))
            .await
            .map_err(Error::from)
            .and_then(|res| res);
        match outcome {
            Ok(stats) => {
                info!(
                    processed = stats.processed,
                    files = stats.files,
                    images = stats.images,
                    output = %stats.output_dir.display(),
                    "extraction complete"
                );
                stats.images
            }
            Err(e) => {
                error!(%e, "image extraction failed");
                0
            }
        }
    }
}

fn save_page(page: &ScrapedPage, stem: &Path) -> Result<()> {
    if let Some(markdown) = page.markdown.as_deref().filter(|s| !s.is_empty()) {
        fs::write(stem.with_extension("md"), markdown)?;
    }
    if let Some(html) = page.html.as_deref().filter(|s| !s.is_empty()) {
        fs::write(stem.with_extension("html"), html)?;
    }
    if let Some(metadata) = &page.metadata {
        fs::write(
            stem.with_extension("metadata.json"),
            serde_json::to_string_pretty(metadata)?,
        )?;
    }
    Ok(())
}

/// Pretty-prints the payload when it is JSON, otherwise keeps it as scraped.
/// Image caches are JavaScript assignments and land here verbatim.
fn write_json_payload(payload: &str, path: &Path) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => fs::write(path, serde_json::to_string_pretty(&value)?)?,
        Err(_) => fs::write(path, payload)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::Engine;

    use super::*;

    /// Serves canned pages and records every request.
    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, ScrapedPage>,
        raw: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
            self.requests.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| Error::ScrapeFailed {
                    url: url.to_string(),
                    reason: "404".into(),
                })
        }

        async fn download(&self, url: &str) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            self.raw
                .get(url)
                .cloned()
                .ok_or_else(|| Error::ScrapeEmpty(url.to_string()))
        }
    }

    fn markdown(text: &str) -> ScrapedPage {
        ScrapedPage {
            markdown: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn image_cache(n: usize) -> String {
        let img = base64::engine::general_purpose::STANDARD.encode(vec![1u8; 256]);
        format!("cp.imagesJSONCache{n} = {{\"dr/pic{n}\": \"{img}\", \"___\": \"\"}};")
    }

    fn config(root: &Path) -> Arc<Config> {
        Arc::new(Config {
            output_root: root.to_path_buf(),
            fallback_json_count: 2,
            ..Config::default()
        })
    }

    const BASE: &str = "https://host/training/ps101/ps101_01/";

    #[tokio::test]
    async fn full_course_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = FakeFetcher::default();
        fetcher.pages.insert(
            format!("{BASE}imsmanifest.xml"),
            ScrapedPage {
                markdown: Some("files: dr/img1.json".into()),
                html: Some("<file href=\"dr/img2.json\"/>".into()),
                metadata: Some(serde_json::json!({"statusCode": 200})),
            },
        );
        fetcher
            .pages
            .insert(format!("{BASE}dr/img1.json"), markdown(&image_cache(1)));
        fetcher
            .pages
            .insert(format!("{BASE}dr/img2.json"), markdown("{\"plain\":true}"));
        fetcher
            .raw
            .insert(format!("{BASE}assets/js/CPM.js"), "var a=1;var b=2;".into());
        fetcher.raw.insert(format!("{BASE}project.txt"), "project".into());

        let scraper = CourseScraper::new(fetcher, config(dir.path()));
        let summary = scraper
            .process(&format!("{BASE}imsmanifest.xml"))
            .await
            .unwrap();
        assert_eq!(
            summary,
            CourseSummary {
                folder: "ps101_01".into(),
                json_ok: 2,
                json_total: 2,
                images: 1,
                assets_ok: 2,
            }
        );

        let course = dir.path().join("ps101_01");
        assert!(course.join("imsmanifest.md").exists());
        assert!(course.join("imsmanifest.html").exists());
        assert!(course.join("imsmanifest.metadata.json").exists());
        assert!(course.join("JSON/dr_img1.md").exists());
        assert_eq!(
            fs::read_to_string(course.join("JSON/dr_img1.json")).unwrap(),
            image_cache(1)
        );
        assert_eq!(
            fs::read_to_string(course.join("JSON/dr_img2.json")).unwrap(),
            "{\n  \"plain\": true\n}"
        );
        assert!(course.join("extracted_images/dr_pic1.png").exists());
        assert_eq!(
            fs::read_to_string(course.join("CPM.js")).unwrap(),
            "var a=1;\nvar b=2;\n"
        );
        assert_eq!(fs::read_to_string(course.join("project.txt")).unwrap(), "project");
    }

    #[tokio::test]
    async fn falls_back_when_manifest_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = FakeFetcher::default();
        fetcher
            .pages
            .insert(format!("{BASE}imsmanifest.xml"), markdown("<manifest/>"));
        fetcher
            .pages
            .insert(format!("{BASE}dr/img2.json"), markdown(&image_cache(2)));

        let scraper = CourseScraper::new(fetcher, config(dir.path()));
        let summary = scraper
            .process(&format!("{BASE}imsmanifest.xml"))
            .await
            .unwrap();
        // img1, img2, imgmd, metadata
        assert_eq!(summary.json_total, 4);
        assert_eq!(summary.json_ok, 1);
        assert_eq!(summary.images, 1);
        assert_eq!(summary.assets_ok, 0);

        let requests = scraper.fetcher.requests.lock().unwrap().clone();
        assert!(requests.contains(&format!("{BASE}dr/imgmd.json")));
        assert!(requests.contains(&format!("{BASE}dr/metadata.json")));
        assert!(requests.contains(&format!("{BASE}assets/js/CPM.js")));
    }

    #[tokio::test]
    async fn manifest_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let scraper = CourseScraper::new(FakeFetcher::default(), config(dir.path()));
        let res = scraper.process(&format!("{BASE}imsmanifest.xml")).await;
        assert!(matches!(res, Err(Error::ScrapeFailed { .. })));
        let requests = scraper.fetcher.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
    }
}
