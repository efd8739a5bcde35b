//! Facebook Page publishing
//!
//! The endpoint depends on the content: videos go to `/{page}/videos`, images
//! to `/{page}/photos`, and text-only posts to `/{page}/feed`.

use serde::Deserialize;
use tracing::info;

use super::graph::{self, GraphError};
use super::PublishInput;
use crate::config::FacebookConfig;
use crate::http::HttpClient;
use crate::types::{FailReason, Platform, PublishResult};

const PLATFORM: Platform = Platform::Facebook;

#[derive(Debug, Deserialize)]
struct PostResponse {
    id: String,
    /// Photo uploads return the feed story id separately
    #[serde(default)]
    post_id: Option<String>,
}

/// Which Page edge a post goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Video,
    Photo,
    Feed,
}

impl ContentKind {
    pub fn of(input: &PublishInput) -> Self {
        if input.video().is_some() {
            ContentKind::Video
        } else if input.image().is_some() {
            ContentKind::Photo
        } else {
            ContentKind::Feed
        }
    }

    fn edge(&self) -> &'static str {
        match self {
            ContentKind::Video => "videos",
            ContentKind::Photo => "photos",
            ContentKind::Feed => "feed",
        }
    }
}

/// Strip whitespace and control characters that break the Graph API
pub fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect()
}

#[derive(Debug, Clone)]
pub struct FacebookAdapter {
    config: FacebookConfig,
    http: HttpClient,
}

impl FacebookAdapter {
    pub fn new(config: FacebookConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub async fn publish(&self, input: &PublishInput) -> PublishResult {
        let token = sanitize_token(&input.credential.access_token);
        if token.is_empty() {
            return PublishResult::failure(
                PLATFORM.as_str(),
                FailReason::TokenInvalid,
                "Facebook access token is empty",
            );
        }

        let page = input.credential.external_account_id.trim();
        if page.is_empty() {
            return PublishResult::failure(
                PLATFORM.as_str(),
                FailReason::CredentialMissing,
                "No Facebook Page is connected to this account",
            )
            .with_recommendations(vec!["Reconnect Facebook and select a Page".to_string()]);
        }

        let kind = ContentKind::of(input);
        let url = format!(
            "{}/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.api_version,
            page,
            kind.edge()
        );

        let caption = input.caption.as_str();
        let mut params: Vec<(&str, &str)> = vec![("access_token", token.as_str())];
        match kind {
            ContentKind::Video => {
                params.push(("file_url", input.video().unwrap_or_default()));
                params.push(("description", caption));
            }
            ContentKind::Photo => {
                params.push(("url", input.image().unwrap_or_default()));
                params.push(("caption", caption));
            }
            ContentKind::Feed => params.push(("message", caption)),
        }

        let response: PostResponse = match graph::read_response(
            PLATFORM,
            self.http.post(&url, |req| req.form(&params)).await,
            GraphError::facebook_reason,
        )
        .await
        {
            Ok(response) => response,
            Err(result) => return result,
        };

        let id = response.post_id.unwrap_or(response.id);
        info!(post_id = %id, kind = ?kind, "Published to Facebook");

        let url = format!("https://www.facebook.com/{}", id);
        PublishResult::success(PLATFORM, id, Some(url))
    }
}
