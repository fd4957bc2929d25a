//! YouTube Data API v3 (`videos?part=snippet,contentDetails`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{parse_iso8601_duration, status_error, FetchError, MetadataSource};
use crate::dj::VideoMeta;

const DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiResp {
    items: Vec<ApiItem>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ApiItem {
    snippet:         Snippet,
    content_details: ContentDetails,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Snippet {
    title: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ContentDetails {
    duration:       String,
    content_rating: ContentRating,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ContentRating {
    yt_rating: String,
}

impl ApiResp {
    fn into_meta(self, video_id: &str) -> Result<VideoMeta, FetchError> {
        if self.items.iter().any(|it| it.content_details.content_rating.yt_rating.eq_ignore_ascii_case("ytAgeRestricted")) {
            return Err(FetchError::AgeRestricted);
        }
        let item = self.items.into_iter().next().ok_or_else(|| FetchError::NotFound(video_id.to_string()))?;
        let raw = item.content_details.duration.trim().to_string();
        let duration = parse_iso8601_duration(&raw).ok_or(FetchError::Duration(raw))?;
        Ok(VideoMeta { id: video_id.to_string(), title: item.snippet.title.trim().to_string(), duration })
    }
}

#[derive(Clone)]
pub struct DataApiSource {
    client:  Client,
    api_key: String,
}

impl DataApiSource {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl MetadataSource for DataApiSource {
    async fn fetch(&self, video_id: &str) -> Result<VideoMeta, FetchError> {
        let resp = self
            .client
            .get(DATA_API_URL)
            .query(&[("part", "snippet,contentDetails"), ("id", video_id), ("key", self.api_key.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let meta = resp.json::<ApiResp>().await?.into_meta(video_id)?;
        tracing::debug!(video.id = %video_id, video.title = %meta.title, secs = meta.duration.as_secs(), "metadata fetched");
        Ok(meta)
    }
}
