//! Instagram long-lived token refresh

use chrono::{Duration, Utc};
use reqwest::Method;
use serde::Deserialize;

use super::{expiry_from, read_token_response, RefreshFailure};
use crate::config::InstagramConfig;
use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchange the current long-lived token for a fresh one
///
/// The platform refuses tokens younger than 24 hours; callers check that
/// window before getting here.
pub async fn refresh(
    http: &HttpClient,
    config: &InstagramConfig,
    record: &CredentialRecord,
) -> Result<CredentialPatch, RefreshFailure> {
    let url = format!("{}/refresh_access_token", config.api_base.trim_end_matches('/'));

    let response: RefreshResponse = read_token_response(
        http.request(Method::GET, &url, |req| {
            req.bearer_auth(record.access_token.as_str())
                .query(&[("grant_type", "ig_refresh_token")])
        })
        .await,
    )
    .await?;

    let now = Utc::now();
    Ok(CredentialPatch {
        access_token: Some(response.access_token),
        expires_at: Some(expiry_from(now, response.expires_in, Duration::days(60))),
        issued_at: Some(now),
        ..Default::default()
    })
}
