//! Google OAuth refresh for YouTube

use chrono::{Duration, Utc};
use reqwest::Method;
use serde::Deserialize;

use super::{expiry_from, read_token_response, RefreshFailure};
use crate::config::YouTubeConfig;
use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

pub async fn refresh(
    http: &HttpClient,
    config: &YouTubeConfig,
    record: &CredentialRecord,
) -> Result<CredentialPatch, RefreshFailure> {
    let refresh_token = record
        .refresh_token
        .as_deref()
        .ok_or_else(|| RefreshFailure::Revoked("no refresh token stored".to_string()))?;

    // invalid_grant arrives as a 400 and is classified as revoked
    let response: TokenResponse = read_token_response(
        http.request(Method::POST, &config.token_url, |req| {
            req.form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
            ])
        })
        .await,
    )
    .await?;

    let now = Utc::now();
    Ok(CredentialPatch {
        access_token: Some(response.access_token),
        // Google only rotates the refresh token occasionally
        refresh_token: response.refresh_token,
        expires_at: Some(expiry_from(now, response.expires_in, Duration::hours(1))),
        issued_at: Some(now),
        granted_scopes: response
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect()),
        ..Default::default()
    })
}
