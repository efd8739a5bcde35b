//! Facebook long-lived token exchange

use chrono::{Duration, Utc};
use reqwest::Method;
use serde::Deserialize;

use super::{expiry_from, read_token_response, RefreshFailure};
use crate::config::FacebookConfig;
use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchange the stored token for a new long-lived one
///
/// Responses without `expires_in` are treated as the standard 60-day token.
/// The app secret goes in the form body so it never appears in a URL.
pub async fn refresh(
    http: &HttpClient,
    config: &FacebookConfig,
    record: &CredentialRecord,
) -> Result<CredentialPatch, RefreshFailure> {
    let url = format!(
        "{}/{}/oauth/access_token",
        config.api_base.trim_end_matches('/'),
        config.api_version
    );

    let response: ExchangeResponse = read_token_response(
        http.request(Method::POST, &url, |req| {
            req.form(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", config.app_id.as_str()),
                ("client_secret", config.app_secret.as_str()),
                ("fb_exchange_token", record.access_token.as_str()),
            ])
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
