//! Platform publish adapters
//!
//! Each adapter executes one platform's publish protocol and never fails:
//! every error is classified into a populated [`PublishResult`]. The set of
//! platforms is closed, so adapters are dispatched through the [`Adapter`]
//! enum rather than trait objects.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosscast::config::Config;
//! use libcrosscast::credentials::CredentialRecord;
//! use libcrosscast::http::HttpClient;
//! use libcrosscast::platforms::{Adapter, PublishInput};
//! use libcrosscast::rate_limiter::AdmissionLimiter;
//! use libcrosscast::types::Platform;
//! use std::sync::Arc;
//!
//! # async fn example() -> libcrosscast::error::Result<()> {
//! let config = Config::default();
//! let limiter = Arc::new(AdmissionLimiter::from_config(&config.http));
//! let http = HttpClient::new(&config.http, limiter)?;
//!
//! let adapter = Adapter::for_platform(Platform::Facebook, &config, http);
//! let credential = CredentialRecord::new(Platform::Facebook, "user-1", "page-token");
//! let result = adapter
//!     .publish(PublishInput::text("Hello from crosscast", credential))
//!     .await;
//! println!("{}: success={}", result.platform, result.success);
//! # Ok(())
//! # }
//! ```

pub mod facebook;
pub mod graph;
pub mod instagram;
pub mod media;
pub mod tiktok;
pub mod youtube;

use crate::config::Config;
use crate::credentials::CredentialRecord;
use crate::error::HttpError;
use crate::http::HttpClient;
use crate::types::{FailReason, Platform, PublishResult};

pub use facebook::FacebookAdapter;
pub use instagram::InstagramAdapter;
pub use tiktok::TikTokAdapter;
pub use youtube::YouTubeAdapter;

/// Everything an adapter needs for one publish attempt
#[derive(Debug, Clone)]
pub struct PublishInput {
    pub caption: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub privacy_level: Option<String>,
    pub credential: CredentialRecord,
}

impl PublishInput {
    pub fn text(caption: impl Into<String>, credential: CredentialRecord) -> Self {
        Self {
            caption: caption.into(),
            image_url: None,
            video_url: None,
            privacy_level: None,
            credential,
        }
    }

    /// Image URL, ignoring blank strings
    pub fn image(&self) -> Option<&str> {
        non_blank(self.image_url.as_deref())
    }

    /// Video URL, ignoring blank strings
    pub fn video(&self) -> Option<&str> {
        non_blank(self.video_url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub enum Adapter {
    Instagram(InstagramAdapter),
    Facebook(FacebookAdapter),
    YouTube(YouTubeAdapter),
    TikTok(TikTokAdapter),
}

impl Adapter {
    pub fn for_platform(platform: Platform, config: &Config, http: HttpClient) -> Self {
        match platform {
            Platform::Instagram => {
                Adapter::Instagram(InstagramAdapter::new(config.instagram.clone(), http))
            }
            Platform::Facebook => Adapter::Facebook(FacebookAdapter::new(config.facebook.clone(), http)),
            Platform::YouTube => Adapter::YouTube(YouTubeAdapter::new(config.youtube.clone(), http)),
            Platform::TikTok => Adapter::TikTok(TikTokAdapter::new(config.tiktok.clone(), http)),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Adapter::Instagram(_) => Platform::Instagram,
            Adapter::Facebook(_) => Platform::Facebook,
            Adapter::YouTube(_) => Platform::YouTube,
            Adapter::TikTok(_) => Platform::TikTok,
        }
    }

    /// Publish to the platform; failures are reported in the result
    pub async fn publish(&self, input: PublishInput) -> PublishResult {
        if let Some(missing) = check_media(self.platform(), &input) {
            return missing;
        }

        match self {
            Adapter::Instagram(adapter) => adapter.publish(&input).await,
            Adapter::Facebook(adapter) => adapter.publish(&input).await,
            Adapter::YouTube(adapter) => adapter.publish(&input).await,
            Adapter::TikTok(adapter) => adapter.publish(&input).await,
        }
    }
}

/// Reject requests without the media the platform requires
pub fn check_media(platform: Platform, input: &PublishInput) -> Option<PublishResult> {
    if platform.requires_video() && input.video().is_none() {
        return Some(
            PublishResult::failure(
                platform.as_str(),
                FailReason::MissingMedia,
                format!("{} requires a video", platform),
            )
            .with_recommendations(vec!["Attach a publicly reachable video URL".to_string()]),
        );
    }

    if platform.requires_media() && input.image().is_none() && input.video().is_none() {
        return Some(
            PublishResult::failure(
                platform.as_str(),
                FailReason::MissingMedia,
                format!("{} requires an image or video", platform),
            )
            .with_recommendations(vec!["Attach a publicly reachable image or video URL".to_string()]),
        );
    }

    None
}

/// Result for a call that failed below the platform API
pub(crate) fn network_failure(platform: Platform, err: &HttpError) -> PublishResult {
    PublishResult::failure(
        platform.as_str(),
        FailReason::NetworkError,
        format!("{} request failed: {}", platform, err),
    )
}
