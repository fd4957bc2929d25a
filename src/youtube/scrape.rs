//! Key-free metadata: the mobile player endpoint and the public watch page.

use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_iso8601_duration, status_error, FetchError, MetadataSource};
use crate::dj::VideoMeta;

const SW_DATA_URL: &str = "https://www.youtube.com/sw.js_data";
const PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player";
const WATCH_URL: &str = "https://www.youtube.com/watch";
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(15);

const IOS_USER_AGENT: &str = "com.google.ios.youtube/20.32.4 (iPhone16,2; U; CPU iOS 18_6_0 like Mac OS X; US)";
const IOS_CLIENT_VERSION: &str = "20.32.4";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0";
const CONSENT_COOKIE: &str = "CONSENT=YES+cb.20210328-17-p0.en+FX+123;";

static META_DURATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+itemprop=["']duration["']\s+content=["']([^"']+)["']"#).ok()
});

static META_TITLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+(?:name|property)=["'](?:og:)?title["']\s+content=["']([^"']+)["']"#).ok()
});

static EMBEDDED_PLAYER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)ytInitialPlayerResponse\s*=\s*(\{.*?\});\s*(?:var\s|</script>)").ok()
});

/* ------------ mobile player endpoint ------------ */

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PlayerResp {
    video_details:      VideoDetails,
    streaming_data:     StreamingData,
    playability_status: PlayabilityStatus,
    microformat:        Microformat,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct VideoDetails {
    title:          String,
    length_seconds: String,
    age_restricted: bool,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct StreamingData {
    adaptive_formats: Vec<Format>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Format {
    approx_duration_ms: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PlayabilityStatus {
    status:                         String,
    reason:                         String,
    desktop_legacy_age_gate_reason: i64,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Microformat {
    player_microformat_renderer: MicroformatRenderer,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct MicroformatRenderer {
    is_family_safe: bool,
    yt_rating:      String,
}

impl PlayerResp {
    fn is_age_restricted(&self) -> bool {
        if self.video_details.age_restricted {
            return true;
        }
        let mf = &self.microformat.player_microformat_renderer;
        if mf.yt_rating.eq_ignore_ascii_case("ytAgeRestricted") {
            return true;
        }
        let ps = &self.playability_status;
        !mf.is_family_safe
            && (ps.status == "AGE_VERIFICATION_REQUIRED"
                || ps.reason.to_lowercase().contains("age")
                || ps.desktop_legacy_age_gate_reason > 0)
    }

    /// Whole seconds from `lengthSeconds`, else from the first adaptive format.
    fn duration_secs(&self) -> u64 {
        if let Ok(secs) = self.video_details.length_seconds.trim().parse::<u64>() {
            if secs > 0 {
                return secs;
            }
        }
        self.streaming_data
            .adaptive_formats
            .iter()
            .filter_map(|f| f.approx_duration_ms.split('.').next()?.parse::<u64>().ok())
            .find(|ms| *ms > 0)
            .map_or(0, |ms| ms / 1000)
    }

    fn into_meta(self, video_id: &str) -> Result<VideoMeta, FetchError> {
        if self.is_age_restricted() {
            return Err(FetchError::AgeRestricted);
        }
        let secs = self.duration_secs();
        let title = self.video_details.title.trim().to_string();
        if secs == 0 || title.is_empty() {
            return Err(FetchError::NotFound(video_id.to_string()));
        }
        Ok(VideoMeta { id: video_id.to_string(), title, duration: Duration::from_secs(secs) })
    }
}

/// Visitor token from `sw.js_data`: an XSSI-guarded JSON array, value at `[0][2][0][0][13]`.
fn visitor_data(body: &str) -> Result<String, FetchError> {
    let body = body.strip_prefix(")]}'").unwrap_or(body);
    let v: Value = serde_json::from_str(body.trim_start()).map_err(|_| FetchError::Shape("sw.js_data is not json"))?;
    v.get(0)
        .and_then(|v| v.get(2))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get(13))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(FetchError::Shape("no visitor data in sw.js_data"))
}

fn player_request(video_id: &str, visitor_data: &str) -> Value {
    json!({
        "videoId": video_id,
        "contentCheckOk": true,
        "context": {
            "client": {
                "clientName": "IOS",
                "clientVersion": IOS_CLIENT_VERSION,
                "deviceMake": "Apple",
                "deviceModel": "iPhone16,2",
                "platform": "MOBILE",
                "osName": "IOS",
                "osVersion": "18.6.0.22G86",
                "visitorData": visitor_data,
                "hl": "en",
                "gl": "US",
                "utcOffsetMinutes": 0
            }
        }
    })
}

/// Asks the player endpoint the way the iOS app does.
#[derive(Clone)]
pub struct MobileScrapeSource {
    client: Client,
}

impl MobileScrapeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn visitor_data(&self) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(SW_DATA_URL)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, IOS_USER_AGENT)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        visitor_data(&resp.text().await?)
    }
}

#[async_trait]
impl MetadataSource for MobileScrapeSource {
    async fn fetch(&self, video_id: &str) -> Result<VideoMeta, FetchError> {
        let visitor = self.visitor_data().await?;
        let resp = self
            .client
            .post(PLAYER_URL)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, IOS_USER_AGENT)
            .json(&player_request(video_id, &visitor))
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let meta = resp.json::<PlayerResp>().await?.into_meta(video_id)?;
        tracing::debug!(video.id = %video_id, video.title = %meta.title, secs = meta.duration.as_secs(), "metadata scraped (player)");
        Ok(meta)
    }
}

/* ------------ public watch page ------------ */

fn unescape_html(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Title and duration from the page's `<meta>` tags. The embedded player
/// response, when it parses, decides age gating.
fn meta_from_watch_page(html: &str, video_id: &str) -> Result<VideoMeta, FetchError> {
    let embedded = EMBEDDED_PLAYER
        .as_ref()
        .and_then(|re| re.captures(html))
        .and_then(|c| serde_json::from_str::<PlayerResp>(c.get(1)?.as_str()).ok());
    if embedded.is_some_and(|p| p.is_age_restricted()) {
        return Err(FetchError::AgeRestricted);
    }
    let capture = |re: &LazyLock<Option<Regex>>| -> Option<String> {
        Some(re.as_ref()?.captures(html)?.get(1)?.as_str().trim().to_string())
    };
    let iso = capture(&META_DURATION).ok_or_else(|| FetchError::NotFound(video_id.to_string()))?;
    let duration = parse_iso8601_duration(&iso).ok_or(FetchError::Duration(iso))?;
    let title = capture(&META_TITLE).ok_or(FetchError::Shape("no title meta tag on watch page"))?;
    Ok(VideoMeta { id: video_id.to_string(), title: unescape_html(&title), duration })
}

#[derive(Clone)]
pub struct WatchPageSource {
    client: Client,
}

impl WatchPageSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataSource for WatchPageSource {
    async fn fetch(&self, video_id: &str) -> Result<VideoMeta, FetchError> {
        let resp = self
            .client
            .get(WATCH_URL)
            .query(&[("v", video_id)])
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::COOKIE, CONSENT_COOKIE)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let meta = meta_from_watch_page(&resp.text().await?, video_id)?;
        tracing::debug!(video.id = %video_id, video.title = %meta.title, secs = meta.duration.as_secs(), "metadata scraped (watch page)");
        Ok(meta)
    }
}
