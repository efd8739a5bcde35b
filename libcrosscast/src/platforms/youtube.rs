//! YouTube video upload
//!
//! The token is checked against a cheap authenticated endpoint first, so an
//! unusable credential is reported without downloading the video. The upload
//! itself is a single `multipart/related` request carrying JSON metadata
//! followed by the video bytes, streamed from the downloaded buffer.

use bytes::Bytes;
use futures::stream;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::media::{self, MediaError};
use super::{network_failure, PublishInput};
use crate::config::YouTubeConfig;
use crate::error::HttpError;
use crate::http::HttpClient;
use crate::types::{FailReason, Platform, PublishResult};

const PLATFORM: Platform = Platform::YouTube;
const BOUNDARY: &str = "crosscast-upload-boundary";
const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5000;
const MAX_VIDEO_BYTES: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorItem {
    #[serde(default)]
    reason: String,
}

/// Upload metadata derived from the caption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy_status: &'static str,
}

impl VideoMetadata {
    pub fn from_caption(caption: &str, privacy_level: Option<&str>) -> Self {
        let first_line = caption.lines().next().unwrap_or_default();
        let title: String = first_line
            .split_whitespace()
            .filter(|word| !word.starts_with('#'))
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_TITLE_CHARS)
            .collect();
        let title = match title.trim() {
            "" => "Untitled".to_string(),
            t => t.to_string(),
        };

        Self {
            title,
            description: caption.chars().take(MAX_DESCRIPTION_CHARS).collect(),
            tags: hashtags(caption),
            privacy_status: privacy_status(privacy_level),
        }
    }

    fn to_json(&self, category_id: &str) -> serde_json::Value {
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        })
    }
}

/// Hashtags in order of appearance, without `#` and duplicates
pub fn hashtags(caption: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in caption.split_whitespace() {
        if let Some(tag) = word.strip_prefix('#') {
            let tag: String = tag
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

fn privacy_status(level: Option<&str>) -> &'static str {
    match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("private") | Some("self_only") => "private",
        Some("unlisted") => "unlisted",
        _ => "public",
    }
}

/// `multipart/related` body kept as separate parts so the video buffer is
/// shared rather than copied
#[derive(Debug, Clone)]
pub struct MultipartRelated {
    parts: [Bytes; 3],
}

impl MultipartRelated {
    /// JSON metadata, then the media
    pub fn new(metadata: &serde_json::Value, content_type: &str, video: Bytes) -> Self {
        let head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n--{b}\r\nContent-Type: {}\r\n\r\n",
            metadata,
            content_type,
            b = BOUNDARY
        );
        let tail = format!("\r\n--{}--\r\n", BOUNDARY);

        Self {
            parts: [Bytes::from(head), video, Bytes::from(tail)],
        }
    }

    pub fn len(&self) -> u64 {
        self.parts.iter().map(|p| p.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_body(&self) -> Body {
        let parts = self.parts.clone();
        Body::wrap_stream(stream::iter(parts.into_iter().map(Ok::<Bytes, std::io::Error>)))
    }
}

#[derive(Debug, Clone)]
pub struct YouTubeAdapter {
    config: YouTubeConfig,
    http: HttpClient,
}

impl YouTubeAdapter {
    pub fn new(config: YouTubeConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    pub async fn publish(&self, input: &PublishInput) -> PublishResult {
        match self.try_publish(input).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_publish(&self, input: &PublishInput) -> Result<PublishResult, PublishResult> {
        let token = input.credential.access_token.trim();
        let video_url = input.video().unwrap_or_default();

        self.validate_token(token).await?;

        let video = media::download(&self.http, video_url, MAX_VIDEO_BYTES)
            .await
            .map_err(|e| download_failure(&e))?;
        debug!(bytes = video.len(), "Downloaded video for YouTube upload");

        let metadata = VideoMetadata::from_caption(&input.caption, input.privacy_level.as_deref());
        let content_type = if video.content_type.starts_with("video/") {
            video.content_type.as_str()
        } else {
            "video/*"
        };
        let body = MultipartRelated::new(
            &metadata.to_json(&self.config.category_id),
            content_type,
            video.bytes.clone(),
        );
        let timeout = self.http.media_timeout();

        let url = format!(
            "{}/upload/youtube/v3/videos?uploadType=multipart&part=snippet,status",
            self.base()
        );
        let bearer = format!("Bearer {}", token);
        let response = self
            .http
            .request(Method::POST, &url, |req| {
                req.header(AUTHORIZATION, bearer.as_str())
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/related; boundary={}", BOUNDARY),
                    )
                    .header(CONTENT_LENGTH, body.len())
                    .timeout(timeout)
                    .body(body.to_body())
            })
            .await
            .map_err(|e| network_failure(PLATFORM, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| network_failure(PLATFORM, &HttpError::from(e)))?;

        if !status.is_success() {
            return Err(upload_failure(status, &text));
        }

        let uploaded: UploadResponse = serde_json::from_str(&text).map_err(|e| {
            PublishResult::failure(
                PLATFORM.as_str(),
                FailReason::Unknown,
                format!("Unexpected YouTube upload response: {}", e),
            )
        })?;

        info!(video_id = %uploaded.id, title = %metadata.title, "Uploaded to YouTube");
        let watch_url = format!("https://www.youtube.com/watch?v={}", uploaded.id);
        Ok(PublishResult::success(PLATFORM, uploaded.id, Some(watch_url)))
    }

    /// Cheap authenticated call proving the token works
    async fn validate_token(&self, token: &str) -> Result<(), PublishResult> {
        let url = format!("{}/youtube/v3/channels", self.base());
        let response = self
            .http
            .request(Method::GET, &url, |req| {
                req.bearer_auth(token)
                    .query(&[("part", "id"), ("mine", "true")])
            })
            .await
            .map_err(|e| network_failure(PLATFORM, &e))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PublishResult::failure(
                PLATFORM.as_str(),
                FailReason::TokenInvalid,
                format!("YouTube rejected the access token ({})", response.status()),
            )
            .with_recommendations(vec!["Reconnect YouTube to refresh permissions".to_string()])),
            s => {
                let text = response.text().await.unwrap_or_default();
                Err(upload_failure(s, &text))
            }
        }
    }
}

fn download_failure(err: &MediaError) -> PublishResult {
    PublishResult::failure(
        PLATFORM.as_str(),
        FailReason::DownloadFailed,
        format!("Could not download the video: {}", err),
    )
    .with_recommendations(vec!["Make sure the video URL is public and reachable".to_string()])
}

fn upload_failure(status: StatusCode, body: &str) -> PublishResult {
    let parsed = serde_json::from_str::<GoogleErrorEnvelope>(body).ok();
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|e| e.error.errors.iter().map(|i| i.reason.as_str()).collect())
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .unwrap_or_else(|| body.chars().take(256).collect());

    let throttled = reasons
        .iter()
        .any(|r| matches!(*r, "quotaExceeded" | "uploadLimitExceeded" | "rateLimitExceeded"));

    let reason = if throttled || status == StatusCode::TOO_MANY_REQUESTS {
        FailReason::RateLimit
    } else if status == StatusCode::UNAUTHORIZED {
        FailReason::TokenExpired
    } else {
        FailReason::PlatformRejected
    };

    let result = PublishResult::failure(
        PLATFORM.as_str(),
        reason,
        format!("YouTube upload failed ({}): {}", status, message),
    );
    match reason {
        FailReason::RateLimit => result.with_recommendations(vec![
            "The daily YouTube upload quota is exhausted; try again tomorrow".to_string(),
        ]),
        _ => result,
    }
}
