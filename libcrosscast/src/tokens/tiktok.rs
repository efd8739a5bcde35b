//! TikTok OAuth v2 refresh
//!
//! TikTok may answer 200 with an `error` field instead of a token, and rotates
//! the refresh token and granted scopes on every refresh.

use chrono::{Duration, Utc};
use reqwest::Method;
use serde::Deserialize;

use super::{expiry_from, read_token_response, RefreshFailure};
use crate::config::TikTokConfig;
use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub async fn refresh(
    http: &HttpClient,
    config: &TikTokConfig,
    record: &CredentialRecord,
) -> Result<CredentialPatch, RefreshFailure> {
    let refresh_token = record
        .refresh_token
        .as_deref()
        .ok_or_else(|| RefreshFailure::Revoked("no refresh token stored".to_string()))?;

    let url = format!("{}/v2/oauth/token/", config.api_base.trim_end_matches('/'));

    let response: TokenResponse = read_token_response(
        http.request(Method::POST, &url, |req| {
            req.form(&[
                ("client_key", config.client_key.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
        })
        .await,
    )
    .await?;

    if let Some(error) = response.error.filter(|e| !e.is_empty()) {
        let reason = match response.error_description {
            Some(desc) => format!("{}: {}", error, desc),
            None => error.clone(),
        };
        return Err(classify_error_code(&error, reason));
    }

    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshFailure::Transient("token response without access_token".to_string()))?;

    let now = Utc::now();
    Ok(CredentialPatch {
        access_token: Some(access_token),
        refresh_token: response.refresh_token,
        expires_at: Some(expiry_from(now, response.expires_in, Duration::hours(24))),
        issued_at: Some(now),
        granted_scopes: response.scope.map(|s| parse_scopes(&s)),
        ..Default::default()
    })
}

fn classify_error_code(code: &str, reason: String) -> RefreshFailure {
    match code {
        "rate_limit_exceeded" | "server_error" | "temporarily_unavailable" => {
            RefreshFailure::Transient(reason)
        }
        _ => RefreshFailure::Revoked(reason),
    }
}

/// TikTok reports scopes comma-separated
pub fn parse_scopes(scope: &str) -> Vec<String> {
    scope
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
