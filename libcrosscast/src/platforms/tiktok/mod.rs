//! TikTok Content Posting API
//!
//! A publish runs through these stages:
//! 1. Preflight: the video URL must be public HTTPS, reachable, a video and
//!    under the size ceiling ([`preflight`]).
//! 2. Capability gate: `video.publish` enables Direct Post, `video.upload`
//!    enables inbox delivery; neither is an immediate failure.
//! 3. Transfer: an ordered list of strategies is tried. Pulling from the URL
//!    comes first; when TikTok refuses to pull (unverified URL ownership) the
//!    video is downloaded once and pushed in chunks ([`upload`]).
//! 4. Status polling until a terminal status ([`status`]).

pub mod preflight;
pub mod status;
pub mod upload;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use self::status::{PollOutcome, PollSettings, PublishStatus};
use self::upload::{ChunkPlan, TikTokUploadSession};
use super::media::{self, DownloadedMedia};
use super::PublishInput;
use crate::config::TikTokConfig;
use crate::error::HttpError;
use crate::http::HttpClient;
use crate::types::{FailReason, Platform, PublishResult};

const PLATFORM: Platform = Platform::TikTok;
const MAX_TITLE_CHARS: usize = 2200;

pub const SCOPE_PUBLISH: &str = "video.publish";
pub const SCOPE_UPLOAD: &str = "video.upload";

/// Privacy levels from most to least restrictive
pub const PRIVACY_PREFERENCE: [&str; 4] = [
    "SELF_ONLY",
    "MUTUAL_FOLLOW_FRIENDS",
    "FOLLOWER_OF_CREATOR",
    "PUBLIC_TO_EVERYONE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Posted straight to the creator's profile
    Direct,
    /// Sent to the creator's inbox to finish in the TikTok app
    Inbox,
}

/// What the granted scopes allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub direct: bool,
    pub inbox: bool,
}

impl Capabilities {
    pub fn from_scopes(scopes: &[String]) -> Self {
        Self {
            direct: scopes.iter().any(|s| s == SCOPE_PUBLISH),
            inbox: scopes.iter().any(|s| s == SCOPE_UPLOAD),
        }
    }

    pub fn mode(&self) -> Option<DeliveryMode> {
        if self.direct {
            Some(DeliveryMode::Direct)
        } else if self.inbox {
            Some(DeliveryMode::Inbox)
        } else {
            None
        }
    }

    /// Transfer strategies in the order they are attempted
    pub fn strategies(&self) -> Vec<Strategy> {
        match self.mode() {
            Some(DeliveryMode::Direct) => {
                let mut list = vec![Strategy::PullDirect, Strategy::PushDirect];
                if self.inbox {
                    list.push(Strategy::PushInbox);
                }
                list
            }
            Some(DeliveryMode::Inbox) => vec![Strategy::PullInbox, Strategy::PushInbox],
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PullDirect,
    PushDirect,
    PullInbox,
    PushInbox,
}

impl Strategy {
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Strategy::PullDirect | Strategy::PushDirect => DeliveryMode::Direct,
            Strategy::PullInbox | Strategy::PushInbox => DeliveryMode::Inbox,
        }
    }

    pub fn is_pull(&self) -> bool {
        matches!(self, Strategy::PullDirect | Strategy::PullInbox)
    }

    fn init_path(&self) -> &'static str {
        match self.mode() {
            DeliveryMode::Direct => "/v2/post/publish/video/init/",
            DeliveryMode::Inbox => "/v2/post/publish/inbox/video/init/",
        }
    }
}

/// Result of one transfer strategy
#[derive(Debug)]
pub enum StrategyOutcome {
    Accepted { publish_id: String, mode: DeliveryMode },
    TryNext(String),
    Terminal(PublishResult),
}

/// Pick the requested privacy level when allowed, else the most restrictive
/// level the creator offers
pub fn negotiate_privacy(requested: Option<&str>, options: &[String]) -> String {
    if let Some(requested) = requested.map(|r| r.trim().to_ascii_uppercase()) {
        if options.iter().any(|o| *o == requested) {
            return requested;
        }
    }

    PRIVACY_PREFERENCE
        .iter()
        .find(|level| options.iter().any(|o| o == *level))
        .map(|level| level.to_string())
        .or_else(|| options.first().cloned())
        .unwrap_or_else(|| PRIVACY_PREFERENCE[0].to_string())
}

/// `error` object present on every Content Posting API response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub log_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: ApiErrorBody,
}

#[derive(Debug, Error)]
pub enum TikTokApiError {
    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("TikTok API error {code} ({status}): {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
        log_id: String,
    },

    #[error("unexpected TikTok response ({status}): {detail}")]
    Malformed { status: StatusCode, detail: String },
}

impl TikTokApiError {
    /// TikTok refused to pull from the URL for ownership or policy reasons
    pub fn is_pull_refusal(&self) -> bool {
        match self {
            TikTokApiError::Api { code, message, .. } => {
                let message = message.to_ascii_lowercase();
                code == "url_ownership_unverified"
                    || message.contains("ownership")
                    || message.contains("guideline")
            }
            _ => false,
        }
    }

    /// Errors that no other strategy can fix
    pub fn blocking_reason(&self) -> Option<FailReason> {
        match self {
            TikTokApiError::Http(_) => Some(FailReason::NetworkError),
            TikTokApiError::Api { status, code, .. } => match code.as_str() {
                "access_token_invalid" => Some(FailReason::TokenExpired),
                "scope_not_authorized" | "scope_permission_missed" => {
                    Some(FailReason::InsufficientScope)
                }
                "rate_limit_exceeded" | "spam_risk_too_many_pending_share" | "reached_active_user_cap" => {
                    Some(FailReason::RateLimit)
                }
                _ if *status == StatusCode::UNAUTHORIZED => Some(FailReason::TokenExpired),
                _ if *status == StatusCode::TOO_MANY_REQUESTS => Some(FailReason::RateLimit),
                _ => None,
            },
            TikTokApiError::Malformed { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => Some(FailReason::TokenExpired),
                StatusCode::TOO_MANY_REQUESTS => Some(FailReason::RateLimit),
                _ => None,
            },
        }
    }
}

/// POST a JSON body with bearer auth and unwrap the `{data, error}` envelope
pub(crate) async fn api_post<T: DeserializeOwned>(
    http: &HttpClient,
    url: &str,
    token: &str,
    body: &Value,
) -> Result<T, TikTokApiError> {
    let bearer = format!("Bearer {}", token);
    let response = http
        .request(Method::POST, url, |req| {
            req.header(AUTHORIZATION, bearer.as_str()).json(body)
        })
        .await?;

    let status = response.status();
    let text = response.text().await.map_err(HttpError::from)?;

    let envelope: Envelope = serde_json::from_str(&text).map_err(|e| TikTokApiError::Malformed {
        status,
        detail: format!("{}: {}", e, text.chars().take(200).collect::<String>()),
    })?;

    if !envelope.error.code.is_empty() && envelope.error.code != "ok" {
        return Err(TikTokApiError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
            log_id: envelope.error.log_id,
        });
    }

    if !status.is_success() {
        return Err(TikTokApiError::Malformed {
            status,
            detail: "error status without error code".to_string(),
        });
    }

    // `data` is an empty object on errors
    let data = envelope.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| TikTokApiError::Malformed {
        status,
        detail: format!("unexpected data: {}", e),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatorInfo {
    #[serde(default)]
    pub creator_username: Option<String>,
    #[serde(default)]
    pub privacy_level_options: Vec<String>,
    #[serde(default)]
    pub comment_disabled: bool,
    #[serde(default)]
    pub duet_disabled: bool,
    #[serde(default)]
    pub stitch_disabled: bool,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
    #[serde(default)]
    upload_url: Option<String>,
}

/// Per-attempt state shared across strategies
struct Attempt<'a> {
    input: &'a PublishInput,
    token: &'a str,
    video_url: &'a str,
    creator: Option<CreatorInfo>,
    privacy_level: String,
    video: Option<DownloadedMedia>,
}

fn hints(reason: FailReason) -> Vec<String> {
    let hints: &[&str] = match reason {
        FailReason::TokenExpired => &["Reconnect TikTok to authorize again"],
        FailReason::InsufficientScope => {
            &["Reconnect TikTok and grant the video.publish or video.upload permission"]
        }
        FailReason::RateLimit => &["TikTok limits how often a creator can post; try again later"],
        FailReason::VideoPullFailed => &[
            "Verify the media domain or URL prefix in the TikTok developer portal",
            "Check the video is MP4/MOV/WebM and within TikTok's duration limits",
        ],
        FailReason::DownloadFailed => &["Make sure the video URL is public and reachable"],
        FailReason::PlatformRejected => &["Check the video meets TikTok's format and content guidelines"],
        _ => &[],
    };
    hints.iter().map(|h| h.to_string()).collect()
}

fn failure(reason: FailReason, message: impl Into<String>) -> PublishResult {
    PublishResult::failure(PLATFORM.as_str(), reason, message).with_recommendations(hints(reason))
}

fn still_processing(publish_id: String, last: &str) -> PublishResult {
    warn!(%publish_id, %last, "TikTok still processing after polling window");
    PublishResult::success(PLATFORM, publish_id, None).with_warning(format!(
        "TikTok is still processing the video (last status {}); it should appear shortly",
        last
    ))
}

#[derive(Debug, Clone)]
pub struct TikTokAdapter {
    config: TikTokConfig,
    http: HttpClient,
}

impl TikTokAdapter {
    pub fn new(config: TikTokConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.config.poll_interval(),
            max_attempts: self.config.max_poll_attempts,
            timeout: self.config.poll_timeout(),
        }
    }

    pub async fn publish(&self, input: &PublishInput) -> PublishResult {
        let video_url = input.video().unwrap_or_default();
        if let Err(result) =
            preflight::validate_video_url(
                &self.http,
                video_url,
                self.config.max_video_bytes,
                self.config.allow_local_media,
            )
            .await
        {
            warn!(url = video_url, error = ?result.error, "TikTok preflight failed");
            return result;
        }

        self.publish_validated(input).await
    }

    /// Everything after preflight
    pub(crate) async fn publish_validated(&self, input: &PublishInput) -> PublishResult {
        let caps = Capabilities::from_scopes(&input.credential.granted_scopes);
        let Some(mode) = caps.mode() else {
            return failure(
                FailReason::InsufficientScope,
                "TikTok account has neither video.publish nor video.upload permission",
            );
        };

        let token = input.credential.access_token.trim();
        let mut attempt = Attempt {
            input,
            token,
            video_url: input.video().unwrap_or_default(),
            creator: None,
            privacy_level: PRIVACY_PREFERENCE[0].to_string(),
            video: None,
        };

        if mode == DeliveryMode::Direct {
            match self.creator_info(token).await {
                Ok(info) => {
                    attempt.privacy_level =
                        negotiate_privacy(input.privacy_level.as_deref(), &info.privacy_level_options);
                    attempt.creator = Some(info);
                }
                Err(e) => {
                    let reason = e.blocking_reason().unwrap_or(FailReason::PlatformRejected);
                    return failure(reason, format!("Could not read TikTok creator info: {}", e));
                }
            }
        }

        let strategies = caps.strategies();
        let mut last_error = String::new();

        for strategy in strategies {
            debug!(?strategy, "Trying TikTok transfer strategy");
            match self.run_strategy(strategy, &mut attempt).await {
                StrategyOutcome::Accepted { publish_id, mode } => {
                    info!(%publish_id, ?strategy, "TikTok accepted the video");
                    return self.finish(&attempt, publish_id, mode).await;
                }
                StrategyOutcome::TryNext(reason) => {
                    warn!(?strategy, %reason, "TikTok strategy failed, trying next");
                    last_error = reason;
                }
                StrategyOutcome::Terminal(result) => return result,
            }
        }

        failure(
            FailReason::PlatformRejected,
            format!("TikTok rejected every transfer method: {}", last_error),
        )
    }

    async fn creator_info(&self, token: &str) -> Result<CreatorInfo, TikTokApiError> {
        let url = format!("{}/v2/post/publish/creator_info/query/", self.base());
        api_post(&self.http, &url, token, &json!({})).await
    }

    fn init_body(&self, strategy: Strategy, attempt: &Attempt<'_>, plan: Option<ChunkPlan>) -> Value {
        let source_info = match plan {
            None => json!({
                "source": "PULL_FROM_URL",
                "video_url": attempt.video_url,
            }),
            Some(plan) => json!({
                "source": "FILE_UPLOAD",
                "video_size": plan.video_size,
                "chunk_size": plan.chunk_size,
                "total_chunk_count": plan.total_chunks,
            }),
        };

        match strategy.mode() {
            DeliveryMode::Inbox => json!({ "source_info": source_info }),
            DeliveryMode::Direct => {
                let creator = attempt.creator.as_ref();
                json!({
                    "post_info": {
                        "title": attempt.input.caption.chars().take(MAX_TITLE_CHARS).collect::<String>(),
                        "privacy_level": attempt.privacy_level,
                        "disable_comment": creator.is_some_and(|c| c.comment_disabled),
                        "disable_duet": creator.is_some_and(|c| c.duet_disabled),
                        "disable_stitch": creator.is_some_and(|c| c.stitch_disabled),
                    },
                    "source_info": source_info,
                })
            }
        }
    }

    async fn run_strategy(&self, strategy: Strategy, attempt: &mut Attempt<'_>) -> StrategyOutcome {
        let url = format!("{}{}", self.base(), strategy.init_path());

        if strategy.is_pull() {
            let body = self.init_body(strategy, attempt, None);
            return match api_post::<InitData>(&self.http, &url, attempt.token, &body).await {
                Ok(init) => StrategyOutcome::Accepted {
                    publish_id: init.publish_id,
                    mode: strategy.mode(),
                },
                Err(e) if e.is_pull_refusal() => StrategyOutcome::TryNext(e.to_string()),
                Err(e) => {
                    let reason = e.blocking_reason().unwrap_or(FailReason::VideoPullFailed);
                    StrategyOutcome::Terminal(failure(reason, format!("TikTok could not pull the video: {}", e)))
                }
            };
        }

        if attempt.video.is_none() {
            match media::download(&self.http, attempt.video_url, self.config.max_video_bytes).await {
                Ok(video) => attempt.video = Some(video),
                Err(e) => {
                    return StrategyOutcome::Terminal(failure(
                        FailReason::DownloadFailed,
                        format!("Could not download the video for upload: {}", e),
                    ))
                }
            }
        }
        let Some(video) = attempt.video.as_ref().filter(|v| !v.is_empty()) else {
            return StrategyOutcome::Terminal(failure(FailReason::DownloadFailed, "Video download produced no data"));
        };

        let plan = ChunkPlan::for_size(video.len());
        let body = self.init_body(strategy, attempt, Some(plan));

        let init = match api_post::<InitData>(&self.http, &url, attempt.token, &body).await {
            Ok(init) => init,
            Err(e) => {
                return match e.blocking_reason() {
                    Some(reason) => StrategyOutcome::Terminal(failure(reason, e.to_string())),
                    None => StrategyOutcome::TryNext(e.to_string()),
                }
            }
        };

        let Some(upload_url) = init.upload_url else {
            return StrategyOutcome::TryNext("init response had no upload_url".to_string());
        };

        let session = TikTokUploadSession {
            publish_id: init.publish_id,
            upload_url,
            video_size: plan.video_size,
            chunk_size: plan.chunk_size,
            total_chunks: plan.total_chunks,
            content_type: video.content_type.clone(),
        };

        match upload::upload_chunks(&self.http, &session, &video.bytes).await {
            Ok(()) => StrategyOutcome::Accepted {
                publish_id: session.publish_id,
                mode: strategy.mode(),
            },
            Err(e) => StrategyOutcome::TryNext(e.to_string()),
        }
    }

    async fn finish(&self, attempt: &Attempt<'_>, publish_id: String, mode: DeliveryMode) -> PublishResult {
        let outcome = status::poll_until_terminal(
            &self.http,
            self.base(),
            attempt.token,
            &publish_id,
            mode,
            self.poll_settings(),
        )
        .await;

        match outcome {
            PollOutcome::Finished(PublishStatus::Complete { post_id }) => {
                let username = attempt
                    .creator
                    .as_ref()
                    .and_then(|c| c.creator_username.clone())
                    .filter(|u| !u.is_empty())
                    .or_else(|| {
                        Some(attempt.input.credential.external_account_name.clone())
                            .filter(|u| !u.is_empty())
                    });
                let url = match (&post_id, username) {
                    (Some(id), Some(user)) => Some(format!("https://www.tiktok.com/@{}/video/{}", user, id)),
                    _ => None,
                };
                info!(%publish_id, post_id = ?post_id, "TikTok publish complete");
                PublishResult::success(PLATFORM, post_id.unwrap_or(publish_id), url)
            }
            PollOutcome::Finished(PublishStatus::SentToInbox) => PublishResult::success(PLATFORM, publish_id, None)
                .with_warning("Video was sent to the creator's TikTok inbox; open TikTok to finish posting"),
            PollOutcome::Finished(PublishStatus::Failed { reason }) => {
                let fail_reason = if reason.contains("pull") || reason.contains("download") {
                    FailReason::VideoPullFailed
                } else {
                    FailReason::PlatformRejected
                };
                failure(fail_reason, format!("TikTok failed to publish the video: {}", reason))
            }
            PollOutcome::Finished(PublishStatus::InProgress(last))
            | PollOutcome::TimedOut { last_status: Some(last) } => still_processing(publish_id, &last),
            PollOutcome::TimedOut { last_status: None } => still_processing(publish_id, "PROCESSING"),
        }
    }
}
