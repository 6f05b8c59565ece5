//! Course package scraper.
//!
//! Fetches SCORM-style course packages through a Firecrawl-compatible scraping API,
//! unpacks the base64 image caches they ship, and fans a lesson list out over a pool of
//! API keys.

pub mod cli;
pub mod config;
pub mod course;
mod error;
pub mod extract;
pub mod lessons;
pub mod macros;
pub mod parse;
pub mod process;
pub mod report;
pub mod request;

pub use error::{Error, Result};
