//! Meta Graph API error envelope, shared by Instagram and Facebook

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::network_failure;
use crate::error::HttpError;
use crate::types::{FailReason, Platform, PublishResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub error_user_msg: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    error: GraphError,
}

impl GraphError {
    /// Parse `{"error": {...}}`; `None` for any other body
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<Envelope>(body).ok().map(|e| e.error)
    }

    /// Application or user throttling
    pub fn is_rate_limit(&self) -> bool {
        matches!(self.code, 4 | 17 | 32 | 613)
    }

    /// Invalid or expired token, or a permission error
    pub fn is_auth(&self) -> bool {
        self.code == 190 || self.code == 10 || (200..=299).contains(&self.code)
    }

    /// Permission error caused by a scope the platform no longer grants
    pub fn is_deprecated_scope(&self) -> bool {
        if !(self.code == 10 || (200..=299).contains(&self.code)) {
            return false;
        }
        let message = self.message.to_lowercase();
        message.contains("publish_actions") || message.contains("deprecated")
    }

    /// Human-readable description, preferring the user-facing message
    pub fn describe(&self) -> String {
        let text = self.error_user_msg.as_deref().unwrap_or(&self.message);
        match self.error_subcode {
            Some(sub) => format!("{} (code {}, subcode {})", text, self.code, sub),
            None => format!("{} (code {})", text, self.code),
        }
    }

    /// Instagram semantics: every auth or permission code means reconnect
    pub fn instagram_reason(&self) -> FailReason {
        if self.is_rate_limit() {
            FailReason::RateLimit
        } else if self.is_auth() {
            FailReason::TokenExpired
        } else {
            FailReason::PlatformRejected
        }
    }

    /// Facebook semantics: deprecated scopes are distinct from plain expiry
    pub fn facebook_reason(&self) -> FailReason {
        if self.is_rate_limit() {
            FailReason::RateLimit
        } else if self.code == 190 {
            FailReason::TokenExpired
        } else if self.is_deprecated_scope() {
            FailReason::DeprecatedScope
        } else {
            FailReason::PlatformRejected
        }
    }
}

/// Decode a successful Graph response or classify the failure
///
/// `classify` maps a parsed Graph error to the platform's fail reason; bodies
/// that are not Graph errors fall back to the HTTP status.
pub async fn read_response<T: DeserializeOwned>(
    platform: Platform,
    result: Result<Response, HttpError>,
    classify: fn(&GraphError) -> FailReason,
) -> Result<T, PublishResult> {
    let response = result.map_err(|e| network_failure(platform, &e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| network_failure(platform, &HttpError::from(e)))?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| {
            PublishResult::failure(
                platform.as_str(),
                FailReason::Unknown,
                format!("Unexpected {} response: {}", platform, e),
            )
        });
    }

    if let Some(err) = GraphError::parse(&body) {
        let reason = classify(&err);
        return Err(with_hints(PublishResult::failure(
            platform.as_str(),
            reason,
            format!("{} rejected the request: {}", platform, err.describe()),
        )));
    }

    let reason = match status {
        StatusCode::TOO_MANY_REQUESTS => FailReason::RateLimit,
        StatusCode::UNAUTHORIZED => FailReason::TokenExpired,
        _ => FailReason::PlatformRejected,
    };
    let preview: String = body.chars().take(256).collect();
    Err(with_hints(PublishResult::failure(
        platform.as_str(),
        reason,
        format!("{} answered {}: {}", platform, status, preview),
    )))
}

fn with_hints(result: PublishResult) -> PublishResult {
    let hints = match result.fail_reason {
        Some(FailReason::TokenExpired) => vec!["Reconnect the account to grant a fresh token".to_string()],
        Some(FailReason::DeprecatedScope) => vec![
            "Reconnect the account; the app requested a permission that no longer exists".to_string(),
        ],
        Some(FailReason::RateLimit) => vec!["Wait a few minutes before publishing again".to_string()],
        _ => Vec::new(),
    };
    result.with_recommendations(hints)
}
