//! Pulls base64 images out of the `cp.imagesJSONCache<N> = {...};` blobs a course ships in
//! its `dr/img*.json` files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

pub const IMAGES_DIR: &str = "extracted_images";
pub const CACHE_FILE_GLOB: &str = "dr_img*.json";
const PLACEHOLDER_NAME: &str = "___";

static IMAGE_CACHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)cp\.imagesJSONCache\d+\s*=\s*(\{.*?\});").unwrap());

/// Per-file outcome of an extraction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub found: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of running over a whole `JSON/` folder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FolderStats {
    pub files: usize,
    pub processed: usize,
    pub images: usize,
    pub output_dir: PathBuf,
}

/// Returns the `{...}` object literal assigned to the image cache, if any.
pub fn find_image_cache(text: &str) -> Option<&str> {
    IMAGE_CACHE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// File name an entry is written under, or `None` when the entry should be ignored.
pub fn image_file_name(name: &str) -> Option<String> {
    if name.trim().is_empty() || name == PLACEHOLDER_NAME {
        return None;
    }
    let mut clean = name.replace(['/', '\\'], "_");
    if !clean.ends_with(".png") {
        clean.push_str(".png");
    }
    Some(clean)
}

fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

/// Extracts every image in `text` into `output_dir`.
///
/// Entries are handled independently: a bad entry is logged and counted, and the rest
/// still get written. Text without an image cache yields zero images. Only an unparsable
/// cache object fails the call.
pub fn extract_images(
    text: &str,
    source: &str,
    output_dir: &Path,
    min_bytes: usize,
) -> Result<ExtractStats> {
    let Some(cache) = find_image_cache(text) else {
        warn!(source, "image cache pattern not found");
        return Ok(ExtractStats::default());
    };
    let images: Map<String, Value> = serde_json::from_str(cache)?;
    fs::create_dir_all(output_dir)?;

    let mut stats = ExtractStats {
        found: images.len(),
        ..Default::default()
    };
    info!(source, found = stats.found, "found images");

    for (name, payload) in &images {
        let Some(file_name) = image_file_name(name) else {
            stats.skipped += 1;
            continue;
        };
        let payload = match payload.as_str() {
            Some(payload) if !payload.trim().is_empty() => payload,
            _ => {
                warn!(%name, "skipped, empty base64 data");
                stats.skipped += 1;
                continue;
            }
        };
        let bytes = match decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%name, %e, "couldn't decode image");
                stats.failed += 1;
                continue;
            }
        };
        if bytes.len() <= min_bytes {
            warn!(%name, len = bytes.len(), "skipped, too small");
            stats.skipped += 1;
            continue;
        }
        match fs::write(output_dir.join(&file_name), &bytes) {
            Ok(()) => {
                debug!(%file_name, len = bytes.len(), "extracted");
                stats.extracted += 1;
            }
            Err(e) => {
                error!(%file_name, %e, "couldn't write image");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

pub fn extract_file(path: &Path, output_dir: &Path, min_bytes: usize) -> Result<ExtractStats> {
    let text = fs::read_to_string(path)?;
    debug!(path = %path.display(), len = text.len(), "read image cache");
    extract_images(&text, &path.display().to_string(), output_dir, min_bytes)
}

/// Runs [`extract_file`] over every `dr_img*.json` in `json_dir`, writing into the sibling
/// `extracted_images` folder. A file that fails is reported and the rest continue.
pub fn extract_folder(json_dir: &Path, min_bytes: usize) -> Result<FolderStats> {
    if !json_dir.is_dir() {
        return Err(Error::NothingToDo(format!(
            "JSON folder not found: {}",
            json_dir.display()
        )));
    }
    let course_dir = json_dir.parent().unwrap_or(Path::new("."));
    let output_dir = course_dir.join(IMAGES_DIR);

    let escaped = glob::Pattern::escape(&json_dir.to_string_lossy());
    let pattern = Path::new(&escaped).join(CACHE_FILE_GLOB);
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(Error::NothingToDo(format!(
            "no {CACHE_FILE_GLOB} files in {}",
            json_dir.display()
        )));
    }
    fs::create_dir_all(&output_dir)?;

    let mut stats = FolderStats {
        files: files.len(),
        output_dir,
        ..Default::default()
    };
    for file in &files {
        match extract_file(file, &stats.output_dir, min_bytes) {
            Ok(file_stats) => {
                info!(
                    file = %file.display(),
                    extracted = file_stats.extracted,
                    skipped = file_stats.skipped,
                    failed = file_stats.failed,
                    "processed image cache"
                );
                stats.processed += 1;
                stats.images += file_stats.extracted;
            }
            Err(e) => error!(file = %file.display(), %e, "couldn't process image cache"),
        }
    }
    Ok(stats)
}
