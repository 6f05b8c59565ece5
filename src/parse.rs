use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "imsmanifest.xml";
const DEFAULT_FOLDER: &str = "course_content";

static JSON_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)dr/img\w*\.json").unwrap());
static JS_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([;{}])(\s*[A-Za-z_$])").unwrap());

/// Name of the course folder: the path segment right before `imsmanifest.xml`,
/// otherwise the second-to-last segment.
pub fn folder_name(url: &str) -> String {
    let parts: Vec<&str> = url.trim_end_matches('/').split('/').collect();
    if let Some(i) = parts.iter().position(|part| *part == MANIFEST_FILE) {
        if i > 0 {
            return parts[i - 1].to_string();
        }
    }
    if parts.len() >= 2 {
        return parts[parts.len() - 2].to_string();
    }
    DEFAULT_FOLDER.to_string()
}

/// Everything up to and including the last `/`.
pub fn base_url(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/"),
        None => format!("{url}/"),
    }
}

/// Collects the `dr/img*.json` references mentioned anywhere in a scraped manifest.
/// Deduplicated and sorted.
pub fn discover_json_files(markdown: Option<&str>, html: Option<&str>) -> Vec<String> {
    let found: BTreeSet<String> = [markdown, html]
        .into_iter()
        .flatten()
        .flat_map(|text| JSON_REFERENCE.find_iter(text))
        .map(|m| m.as_str().to_string())
        .collect();
    found.into_iter().collect()
}

/// Guessed references for manifests that don't list their image caches.
pub fn fallback_json_files(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("dr/img{i}.json"))
        .chain(["dr/imgmd.json".to_string(), "dr/metadata.json".to_string()])
        .collect()
}

#[inline]
pub fn safe_file_name(relative: &str) -> String {
    relative.replace(['/', '\\'], "_")
}

/// Plain text of a scraped HTML page. Raw files served by the host come back wrapped
/// in a `<pre>`, so that takes precedence over the body.
pub fn page_text(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);
    let pre_selector = create_selector("pre")?;
    if let Some(pre) = doc.select(&pre_selector).next() {
        return Ok(pre.text().collect());
    }
    let body_selector = create_selector("body")?;
    let text = match doc.select(&body_selector).next() {
        Some(body) => body.text().collect(),
        None => doc.root_element().text().collect(),
    };
    Ok(text)
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

/// Breaks minified JavaScript into lines after `;`, `{` and `}` whenever an identifier follows.
pub fn format_javascript(js: &str) -> String {
    let mut formatted = JS_BREAK.replace_all(js, "${1}\n${2}").into_owned();
    if !formatted.ends_with('\n') {
        formatted.push('\n');
    }
    formatted
}
