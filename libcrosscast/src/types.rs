//! Core types for Crosscast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Supported publishing platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Facebook,
    YouTube,
    TikTok,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Instagram,
        Platform::Facebook,
        Platform::YouTube,
        Platform::TikTok,
    ];

    /// Lowercase identifier used in requests, storage and results
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
        }
    }

    /// Canonical spelling of a requested platform name
    ///
    /// Known platforms map to their lowercase identifier; anything else is
    /// kept as given, trimmed.
    pub fn canonical_name(name: &str) -> String {
        match name.parse::<Platform>() {
            Ok(platform) => platform.as_str().to_string(),
            Err(_) => name.trim().to_string(),
        }
    }

    /// Whether a post on this platform must carry an image or video
    pub fn requires_media(&self) -> bool {
        !matches!(self, Platform::Facebook)
    }

    /// Whether a post on this platform must carry a video specifically
    pub fn requires_video(&self) -> bool {
        matches!(self, Platform::YouTube | Platform::TikTok)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            "youtube" => Ok(Platform::YouTube),
            "tiktok" => Ok(Platform::TikTok),
            other => Err(format!("Unsupported platform: {}", other)),
        }
    }
}

/// Classified reason attached to a failed publish result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    CredentialMissing,
    CredentialExpired,
    CredentialRefreshTransient,
    TokenExpired,
    TokenInvalid,
    InsufficientScope,
    DeprecatedScope,
    PlatformRejected,
    MissingMedia,
    /// Media URL is unreachable or not a usable video
    UrlValidationFailed,
    /// Media URL cannot be fetched by the platform (e.g. a local host)
    CompatibilityFailed,
    DownloadFailed,
    VideoPullFailed,
    RateLimit,
    NetworkError,
    UnsupportedPlatform,
    Unknown,
}

impl FailReason {
    /// Whether trying the same publish again later can succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailReason::CredentialRefreshTransient | FailReason::RateLimit | FailReason::NetworkError
        )
    }

    /// Whether the stored credential must be cleared after this failure
    pub fn invalidates_credential(&self) -> bool {
        matches!(self, FailReason::TokenExpired | FailReason::DeprecatedScope)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::CredentialMissing => "credential_missing",
            FailReason::CredentialExpired => "credential_expired",
            FailReason::CredentialRefreshTransient => "credential_refresh_transient",
            FailReason::TokenExpired => "token_expired",
            FailReason::TokenInvalid => "token_invalid",
            FailReason::InsufficientScope => "insufficient_scope",
            FailReason::DeprecatedScope => "deprecated_scope",
            FailReason::PlatformRejected => "platform_rejected",
            FailReason::MissingMedia => "missing_media",
            FailReason::UrlValidationFailed => "url_validation_failed",
            FailReason::CompatibilityFailed => "compatibility_failed",
            FailReason::DownloadFailed => "download_failed",
            FailReason::VideoPullFailed => "video_pull_failed",
            FailReason::RateLimit => "rate_limit",
            FailReason::NetworkError => "network_error",
            FailReason::UnsupportedPlatform => "unsupported_platform",
            FailReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inbound request to publish one piece of content to several platforms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub caption: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    pub platforms: Vec<String>,
    pub user_id: String,
    #[serde(default)]
    pub privacy_level: Option<String>,
}

/// Outcome of publishing to a single platform
///
/// One result exists per requested platform per dispatch; results are never
/// mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub platform: String,
    pub success: bool,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<FailReason>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl PublishResult {
    pub fn success(platform: Platform, external_id: String, url: Option<String>) -> Self {
        Self {
            platform: platform.as_str().to_string(),
            success: true,
            external_id: Some(external_id),
            url,
            error: None,
            fail_reason: None,
            retryable: false,
            recommendations: Vec::new(),
            warning: None,
        }
    }

    pub fn failure(platform: impl Into<String>, reason: FailReason, error: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            success: false,
            external_id: None,
            url: None,
            error: Some(error.into()),
            fail_reason: Some(reason),
            retryable: reason.is_retryable(),
            recommendations: Vec::new(),
            warning: None,
        }
    }

    pub fn with_recommendations(mut self, recommendations: Vec<String>) -> Self {
        self.recommendations = recommendations;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Whether this result answers a request for `name`, in any spelling
    pub fn is_for(&self, name: &str) -> bool {
        Platform::canonical_name(&self.platform) == Platform::canonical_name(name)
    }
}

/// Overall classification of one dispatch, computed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    AllSuccess,
    Partial,
    AllFailure,
}

impl DispatchOutcome {
    /// Classify a result list; an empty list counts as a failure
    pub fn classify(results: &[PublishResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        if !results.is_empty() && succeeded == results.len() {
            DispatchOutcome::AllSuccess
        } else if succeeded > 0 {
            DispatchOutcome::Partial
        } else {
            DispatchOutcome::AllFailure
        }
    }
}

/// Lifecycle of a scheduled post, owned by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Executing => "executing",
            PostStatus::Completed => "completed",
            PostStatus::Failed => "failed",
        }
    }

    /// Terminal statuses have no further automatic transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Completed | PostStatus::Failed)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "executing" => Ok(PostStatus::Executing),
            "completed" => Ok(PostStatus::Completed),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("Unknown post status: {}", other)),
        }
    }
}

/// Content carried by a scheduled post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub caption: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub privacy_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub platforms: Vec<String>,
    pub content: PostContent,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub platform_results: Vec<PublishResult>,
}

impl ScheduledPost {
    pub fn new(
        user_id: String,
        platforms: Vec<String>,
        content: PostContent,
        scheduled_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platforms: platforms.iter().map(|name| Platform::canonical_name(name)).collect(),
            content,
            scheduled_at,
            status: PostStatus::Pending,
            retry_count: 0,
            max_retries,
            platform_results: Vec::new(),
        }
    }

    /// Build the dispatch request for the given platform subset
    pub fn dispatch_request(&self, platforms: Vec<String>) -> DispatchRequest {
        DispatchRequest {
            caption: self.content.caption.clone(),
            image_url: self.content.image_url.clone(),
            video_url: self.content.video_url.clone(),
            platforms,
            user_id: self.user_id.clone(),
            privacy_level: self.content.privacy_level.clone(),
        }
    }

    /// Platforms that have not yet been published successfully
    pub fn outstanding_platforms(&self) -> Vec<String> {
        self.platforms
            .iter()
            .filter(|name| {
                !self
                    .platform_results
                    .iter()
                    .any(|r| r.success && r.is_for(name))
            })
            .cloned()
            .collect()
    }
}

/// Partial update applied atomically to a scheduled post
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub status: Option<PostStatus>,
    pub retry_count: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub platform_results: Option<Vec<PublishResult>>,
}

impl StatusPatch {
    pub fn status(status: PostStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(&self, post: &mut ScheduledPost) {
        if let Some(status) = self.status {
            post.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            post.retry_count = retry_count;
        }
        if let Some(scheduled_at) = self.scheduled_at {
            post.scheduled_at = scheduled_at;
        }
        if let Some(results) = &self.platform_results {
            post.platform_results = results.clone();
        }
    }
}
