use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::Result;

/// Looked up in the working directory when no explicit config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "coursescrap.toml";

/// Runtime settings. Every field has a default so an empty (or missing) file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the scraping API, without the `/v1/scrape` suffix.
    pub api_base_url: String,
    /// Directory the course folders are created in.
    pub output_root: PathBuf,
    /// How many `dr/img<N>.json` names to try when the manifest names none.
    pub fallback_json_count: usize,
    /// Upper bound on concurrent workers, regardless of how many keys are loaded.
    pub max_workers: usize,
    pub batch_delay_secs: u64,
    pub download_timeout_secs: u64,
    /// Recorded task errors are cut to this many characters.
    pub error_max_chars: usize,
    pub key_preview_chars: usize,
    /// Decoded images at or below this size are treated as corrupted.
    pub min_image_bytes: usize,
    /// Extensions fetched with a plain GET instead of the scraping API.
    pub raw_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.firecrawl.dev".into(),
            output_root: PathBuf::from("."),
            fallback_json_count: 50,
            max_workers: 68,
            batch_delay_secs: 30,
            download_timeout_secs: 30,
            error_max_chars: 200,
            key_preview_chars: 20,
            min_image_bytes: 100,
            raw_extensions: vec!["js".into(), "txt".into()],
        }
    }
}

impl Config {
    /// Reads `path` if given, otherwise `coursescrap.toml` when it exists, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&raw)?;
        debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// True when `url` should bypass the scraping API.
    pub fn is_raw_asset(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.raw_extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext.to_lowercase())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.fallback_json_count, 50);
        assert_eq!(config.error_max_chars, 200);
        assert_eq!(config.min_image_bytes, 100);
        assert_eq!(config.batch_delay(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = Config::from_toml(
            r#"
            max_workers = 4
            batch_delay_secs = 0
            raw_extensions = ["js"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.batch_delay(), Duration::ZERO);
        assert!(config.is_raw_asset("https://h/x/assets/js/CPM.js"));
        assert!(!config.is_raw_asset("https://h/x/project.txt"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Config::from_toml("max_wrokers = 3").is_err());
    }

    #[test]
    fn raw_asset_match_ignores_case() {
        let config = Config::default();
        assert!(config.is_raw_asset("https://h/a/CPM.JS"));
        assert!(config.is_raw_asset("https://h/a/project.txt"));
        assert!(!config.is_raw_asset("https://h/a/dr/img1.json"));
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "fallback_json_count = 7\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.fallback_json_count, 7);
    }
}
