//! YouTube collaborator: link validation and video metadata lookup.
//!
//! Metadata comes from a chain of sources tried in order: the mobile player
//! endpoint and the public watch page (no key needed), then the Data API
//! when `YT_API_KEY` is set.

pub mod data_api;
pub mod scrape;

use std::{sync::Arc, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::dj::VideoMeta;

pub use data_api::DataApiSource;
pub use scrape::{MobileScrapeSource, WatchPageSource};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

static WATCH_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&].*)?$").ok()
});

static ISO_DURATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").ok()
});

/// Pulls the 11-character video id out of a watch or short link.
pub fn video_id_from_url(raw: &str) -> Option<String> {
    let caps = WATCH_URL.as_ref()?.captures(raw.trim())?;
    Some(caps.get(1)?.as_str().to_string())
}

/// `PT1H2M3S` style durations (a leading day count is accepted too).
pub fn parse_iso8601_duration(raw: &str) -> Option<Duration> {
    let caps = ISO_DURATION.as_ref()?.captures(raw.trim())?;
    if caps.iter().skip(1).all(|c| c.is_none()) {
        return None;
    }
    let part = |i: usize, unit: u64| -> Option<u64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<u64>().ok()?.checked_mul(unit),
            None => Some(0),
        }
    };
    let secs = part(1, 86_400)?
        .checked_add(part(2, 3_600)?)?
        .checked_add(part(3, 60)?)?
        .checked_add(part(4, 1)?)?;
    Some(Duration::from_secs(secs))
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("video is age restricted")]
    AgeRestricted,
    #[error("no video found for id {0}")]
    NotFound(String),
    #[error("no metadata source configured (set YT_API_KEY or USE_SCRAPE=true)")]
    NoSource,
    #[error("metadata service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unparseable duration {0:?}")]
    Duration(String),
    #[error("unexpected response: {0}")]
    Shape(&'static str),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, video_id: &str) -> Result<VideoMeta, FetchError>;
}

/// Shared HTTP client for every source.
pub fn http_client() -> Result<Client, FetchError> {
    Ok(Client::builder().timeout(FETCH_TIMEOUT).build()?)
}

/// Reads the body of a non-2xx response into a [`FetchError::Status`].
async fn status_error(resp: reqwest::Response) -> FetchError {
    let status = resp.status().as_u16();
    let mut body = resp.text().await.unwrap_or_default();
    body.truncate(4096);
    FetchError::Status { status, body: body.trim().to_string() }
}

/* ------------ fallback chain ------------ */

/// Tries each source in turn and returns the first success. An age
/// restriction reported by any source is final.
#[derive(Default)]
pub struct FallbackSource {
    sources: Vec<(&'static str, Arc<dyn MetadataSource>)>,
}

impl FallbackSource {
    pub fn with(mut self, name: &'static str, source: Arc<dyn MetadataSource>) -> Self {
        self.sources.push((name, source));
        self
    }

    /// Key-free scraping first (unless disabled), then the Data API if a key is set.
    pub fn from_config(client: Client, use_scrape: bool, api_key: Option<String>) -> Self {
        let mut chain = Self::default();
        if use_scrape {
            chain = chain
                .with("mobile", Arc::new(MobileScrapeSource::new(client.clone())))
                .with("watch page", Arc::new(WatchPageSource::new(client.clone())));
        }
        if let Some(key) = api_key {
            chain = chain.with("data api", Arc::new(DataApiSource::new(client, key)));
        }
        chain
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|(name, _)| *name).collect()
    }
}

#[async_trait]
impl MetadataSource for FallbackSource {
    async fn fetch(&self, video_id: &str) -> Result<VideoMeta, FetchError> {
        let mut last = FetchError::NoSource;
        for (name, source) in &self.sources {
            match source.fetch(video_id).await {
                Ok(meta) => return Ok(meta),
                Err(FetchError::AgeRestricted) => return Err(FetchError::AgeRestricted),
                Err(e) => {
                    tracing::warn!(source = *name, video.id = %video_id, error = %e, "metadata source failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
