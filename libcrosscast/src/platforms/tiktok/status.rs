//! Publish status polling
//!
//! After init, TikTok downloads or receives the media and processes it
//! asynchronously. Polling stops at the first terminal status; when the
//! attempt or wall-clock bound runs out, one last check is made and the
//! publish is reported as still in progress rather than failed.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{api_post, DeliveryMode, TikTokApiError};
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
    /// Spelled this way by the API
    #[serde(default)]
    publicaly_available_post_id: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// PROCESSING_DOWNLOAD, PROCESSING_UPLOAD or any non-terminal state
    InProgress(String),
    Complete { post_id: Option<String> },
    /// Delivered to the creator's inbox to finish in the app
    SentToInbox,
    Failed { reason: String },
}

impl PublishStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PublishStatus::InProgress(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Finished(PublishStatus),
    /// Bound exhausted while still processing; carries the last status seen
    TimedOut { last_status: Option<String> },
}

/// Polling bounds
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

fn post_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn interpret(data: StatusData, mode: DeliveryMode) -> PublishStatus {
    match data.status.as_str() {
        "PUBLISH_COMPLETE" => PublishStatus::Complete {
            post_id: data.publicaly_available_post_id.iter().find_map(post_id_string),
        },
        "SEND_TO_USER_INBOX" if mode == DeliveryMode::Inbox => PublishStatus::SentToInbox,
        "FAILED" => PublishStatus::Failed {
            reason: data.fail_reason.unwrap_or_else(|| "unknown".to_string()),
        },
        other => PublishStatus::InProgress(other.to_string()),
    }
}

pub async fn fetch_status(
    http: &HttpClient,
    api_base: &str,
    token: &str,
    publish_id: &str,
    mode: DeliveryMode,
) -> Result<PublishStatus, TikTokApiError> {
    let url = format!("{}/v2/post/publish/status/fetch/", api_base);
    let data: StatusData = api_post(http, &url, token, &json!({ "publish_id": publish_id })).await?;
    Ok(interpret(data, mode))
}

/// Poll until a terminal status or the bound is exhausted
pub async fn poll_until_terminal(
    http: &HttpClient,
    api_base: &str,
    token: &str,
    publish_id: &str,
    mode: DeliveryMode,
    settings: PollSettings,
) -> PollOutcome {
    let deadline = Instant::now() + settings.timeout;
    let mut last_status = None;

    for attempt in 1..=settings.max_attempts.max(1) {
        match fetch_status(http, api_base, token, publish_id, mode).await {
            Ok(status) if status.is_terminal() => return PollOutcome::Finished(status),
            Ok(PublishStatus::InProgress(status)) => {
                debug!(publish_id, attempt, %status, "TikTok publish still processing");
                last_status = Some(status);
            }
            Ok(_) => {}
            Err(e) => warn!(publish_id, attempt, "TikTok status check failed: {}", e),
        }

        if Instant::now() + settings.interval >= deadline {
            break;
        }
        tokio::time::sleep(settings.interval).await;
    }

    // Last look before giving up on waiting
    match fetch_status(http, api_base, token, publish_id, mode).await {
        Ok(status) if status.is_terminal() => PollOutcome::Finished(status),
        Ok(PublishStatus::InProgress(status)) => PollOutcome::TimedOut {
            last_status: Some(status),
        },
        _ => PollOutcome::TimedOut { last_status },
    }
}
