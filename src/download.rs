//! Fetches raw `marginalpdbc` files from the OMIE website into staging.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_BASE_URL: &str = "https://www.omie.es/es/file-download";
const FILE_PREFIX: &str = "marginalpdbc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { path: PathBuf, bytes: usize },
    AlreadyPresent { path: PathBuf },
    /// Any non-200 answer; usually the day is not published yet.
    NotPublished { file_name: String, status: u16 },
}

/// `marginalpdbc_YYYYMMDD.<suffix>`
pub fn raw_file_name(date: NaiveDate, suffix: &str) -> String {
    format!("{}_{}.{}", FILE_PREFIX, date.format("%Y%m%d"), suffix)
}

/// Prices are published the day before delivery.
pub fn default_target_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(1)
}

pub struct Downloader {
    client: reqwest::blocking::Client,
    base_url: String,
    staging_dir: PathBuf,
}

impl Downloader {
    pub fn new(base_url: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("omie_processor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            staging_dir: staging_dir.into(),
        })
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!(
            "{}?parents={}&filename={}",
            self.base_url.trim_end_matches('/'),
            FILE_PREFIX,
            file_name
        )
    }

    /// Fetch one file per suffix. Each suffix is tried independently; a file
    /// that is not published yet is reported, not treated as an error.
    pub fn fetch_day(&self, date: NaiveDate, suffixes: &[String]) -> Result<Vec<FetchOutcome>> {
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("creating {}", self.staging_dir.display()))?;

        suffixes
            .iter()
            .map(|suffix| self.fetch_file(&raw_file_name(date, suffix)))
            .collect()
    }

    fn fetch_file(&self, file_name: &str) -> Result<FetchOutcome> {
        let path = self.staging_dir.join(file_name);
        if path.is_file() {
            log::info!("{} already staged", file_name);
            return Ok(FetchOutcome::AlreadyPresent { path });
        }

        let url = self.url_for(file_name);
        log::info!("⬇️  GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("requesting {}", url))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            log::warn!("⚠️  {} not available (HTTP {})", file_name, status.as_u16());
            return Ok(FetchOutcome::NotPublished {
                file_name: file_name.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .with_context(|| format!("reading body of {}", url))?;
        store(&path, &body)?;
        Ok(FetchOutcome::Downloaded {
            path,
            bytes: body.len(),
        })
    }
}

fn store(path: &Path, body: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("saving {}", path.display()))?;
    Ok(())
}
