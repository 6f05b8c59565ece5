use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),
    #[error("Invalid course URL: {0}")]
    ParseUrl(#[from] url::ParseError),

    #[error("Scrape API rejected {url}: {reason}")]
    ScrapeFailed { url: String, reason: String },
    #[error("Scrape API returned no content for {0}")]
    ScrapeEmpty(String),
    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("No API keys available")]
    NoApiKeys,
    #[error("CSV is missing the {0} column")]
    MissingColumn(&'static str),
    #[error("Nothing to do: {0}")]
    NothingToDo(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Config Error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Glob Error: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("Base64 Error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
}
