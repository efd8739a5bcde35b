//! Instagram publishing through the Graph API
//!
//! Publishing is two-phase: create a media container referencing the public
//! media URL and caption, then publish the container. Videos are posted as
//! Reels, whose containers must finish processing before they can be
//! published. The access token travels in the `Authorization` header, never
//! in the URL.

use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::graph::{self, GraphError};
use super::PublishInput;
use crate::config::InstagramConfig;
use crate::http::HttpClient;
use crate::types::{FailReason, Platform, PublishResult};

const PLATFORM: Platform = Platform::Instagram;

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    #[serde(default)]
    permalink: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstagramAdapter {
    config: InstagramConfig,
    http: HttpClient,
}

impl InstagramAdapter {
    pub fn new(config: InstagramConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    pub async fn publish(&self, input: &PublishInput) -> PublishResult {
        match self.try_publish(input).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_publish(&self, input: &PublishInput) -> Result<PublishResult, PublishResult> {
        let token = input.credential.access_token.trim();
        let account = match input.credential.external_account_id.trim() {
            "" => "me",
            id => id,
        };

        let container = self.create_container(account, token, input).await?;
        debug!(container_id = %container, "Instagram container created");

        if input.video().is_some() {
            self.wait_for_container(&container, token).await?;
        }

        let url = self.endpoint(&format!("{}/media_publish", account));
        let published: IdResponse = graph::read_response(
            PLATFORM,
            self.http
                .post(&url, |req| {
                    req.bearer_auth(token)
                        .form(&[("creation_id", container.as_str())])
                })
                .await,
            GraphError::instagram_reason,
        )
        .await?;

        let permalink = self.permalink(&published.id, token).await;
        info!(media_id = %published.id, "Published to Instagram");

        Ok(PublishResult::success(PLATFORM, published.id, permalink))
    }

    async fn create_container(
        &self,
        account: &str,
        token: &str,
        input: &PublishInput,
    ) -> Result<String, PublishResult> {
        let url = self.endpoint(&format!("{}/media", account));
        let caption = input.caption.as_str();

        let mut params: Vec<(&str, &str)> = vec![("caption", caption)];
        match (input.video(), input.image()) {
            (Some(video), _) => {
                params.push(("media_type", "REELS"));
                params.push(("video_url", video));
            }
            (None, Some(image)) => params.push(("image_url", image)),
            (None, None) => {}
        }

        let created: IdResponse = graph::read_response(
            PLATFORM,
            self.http
                .post(&url, |req| req.bearer_auth(token).form(&params))
                .await,
            GraphError::instagram_reason,
        )
        .await?;

        Ok(created.id)
    }

    /// Poll a Reel container until it is ready to publish
    async fn wait_for_container(&self, container: &str, token: &str) -> Result<(), PublishResult> {
        let url = self.endpoint(container);
        let interval = Duration::from_secs(self.config.container_poll_interval_secs);

        for attempt in 1..=self.config.container_poll_attempts.max(1) {
            let status: ContainerStatus = graph::read_response(
                PLATFORM,
                self.http
                    .request(Method::GET, &url, |req| {
                        req.bearer_auth(token)
                            .query(&[("fields", "status_code,status")])
                    })
                    .await,
                GraphError::instagram_reason,
            )
            .await?;

            match status.status_code.as_deref() {
                Some("FINISHED") | Some("PUBLISHED") => return Ok(()),
                Some(code @ ("ERROR" | "EXPIRED")) => {
                    let detail = status.status.unwrap_or_default();
                    return Err(PublishResult::failure(
                        PLATFORM.as_str(),
                        FailReason::PlatformRejected,
                        format!("Instagram could not process the video ({}): {}", code, detail),
                    )
                    .with_recommendations(vec![
                        "Check the video meets Reels requirements (MP4/MOV, H.264, 3-90 seconds)"
                            .to_string(),
                    ]));
                }
                other => {
                    debug!(attempt, status = ?other, "Instagram container still processing");
                }
            }

            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        Err(PublishResult::failure(
            PLATFORM.as_str(),
            FailReason::Unknown,
            "Instagram did not finish processing the video in time",
        ))
    }

    /// Best-effort permalink lookup
    async fn permalink(&self, media_id: &str, token: &str) -> Option<String> {
        let url = self.endpoint(media_id);
        let response = self
            .http
            .request(Method::GET, &url, |req| {
                req.bearer_auth(token).query(&[("fields", "permalink")])
            })
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response.json::<Permalink>().await.ok()?.permalink
    }
}
