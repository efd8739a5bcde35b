//! Token lifecycle management
//!
//! One [`TokenManager`] per platform keeps the stored credential usable:
//! [`TokenManager::ensure_valid`] returns the current record when it is not
//! due for refresh, otherwise runs the platform's refresh protocol and
//! persists the result before returning it.
//!
//! Failures are classified into [`CredentialError`]:
//! - no stored credential: `Missing`
//! - refresh token rejected or revoked: the credential is cleared and
//!   `Expired` is returned, prompting a reconnect
//! - network errors, 5xx and 429 during refresh: `RefreshTransient`
//!
//! Refreshes of one (user, platform) pair are serialized in-process by
//! [`RefreshLocks`]; the record is re-read under the lock so concurrent
//! callers observe the fresh token instead of refreshing again.

pub mod facebook;
pub mod instagram;
pub mod tiktok;
pub mod youtube;

use chrono::{DateTime, Duration, Utc};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::{CredentialRecord, RefreshLocks};
use crate::error::{CredentialError, HttpError};
use crate::http::HttpClient;
use crate::platforms::graph::GraphError;
use crate::store::CredentialStore;
use crate::types::Platform;

/// When a credential must be refreshed before use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh once expiry is closer than this
    pub lookahead: Duration,
    /// Whether a record without a known expiry counts as due
    pub unknown_expiry_is_due: bool,
    /// Whether refreshing needs a stored refresh token
    pub requires_refresh_token: bool,
    /// Tokens younger than this cannot be refreshed
    pub min_token_age: Option<Duration>,
}

impl RefreshPolicy {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            // ~60-day long-lived tokens
            Platform::Instagram => Self {
                lookahead: Duration::days(7),
                unknown_expiry_is_due: false,
                requires_refresh_token: false,
                min_token_age: Some(Duration::hours(24)),
            },
            Platform::Facebook => Self {
                lookahead: Duration::days(7),
                unknown_expiry_is_due: false,
                requires_refresh_token: false,
                min_token_age: None,
            },
            // Short-lived access tokens backed by refresh tokens
            Platform::YouTube | Platform::TikTok => Self {
                lookahead: Duration::minutes(5),
                unknown_expiry_is_due: true,
                requires_refresh_token: true,
                min_token_age: None,
            },
        }
    }

    pub fn is_due(&self, record: &CredentialRecord, now: DateTime<Utc>) -> bool {
        record
            .expires_within(now, self.lookahead)
            .unwrap_or(self.unknown_expiry_is_due)
    }

    /// Whether the token is still inside the platform's no-refresh window
    ///
    /// An unknown issue time counts as old enough.
    pub fn too_young_to_refresh(&self, record: &CredentialRecord, now: DateTime<Utc>) -> bool {
        match (self.min_token_age, record.issued_at) {
            (Some(min_age), Some(issued_at)) => now - issued_at < min_age,
            _ => false,
        }
    }
}

/// Why a refresh attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh token (or long-lived token) was rejected; reconnect needed
    Revoked(String),
    /// Network error, 5xx or rate limiting; try again later
    Transient(String),
}

/// Platform-specific refresh protocol parameters
#[derive(Debug, Clone)]
enum RefreshEndpoint {
    Instagram(crate::config::InstagramConfig),
    Facebook(crate::config::FacebookConfig),
    YouTube(crate::config::YouTubeConfig),
    TikTok(crate::config::TikTokConfig),
}

#[derive(Clone)]
pub struct TokenManager {
    platform: Platform,
    policy: RefreshPolicy,
    endpoint: RefreshEndpoint,
    store: Arc<dyn CredentialStore>,
    http: HttpClient,
    locks: Arc<RefreshLocks>,
}

impl TokenManager {
    pub fn new(
        platform: Platform,
        config: &Config,
        store: Arc<dyn CredentialStore>,
        http: HttpClient,
        locks: Arc<RefreshLocks>,
    ) -> Self {
        let endpoint = match platform {
            Platform::Instagram => RefreshEndpoint::Instagram(config.instagram.clone()),
            Platform::Facebook => RefreshEndpoint::Facebook(config.facebook.clone()),
            Platform::YouTube => RefreshEndpoint::YouTube(config.youtube.clone()),
            Platform::TikTok => RefreshEndpoint::TikTok(config.tiktok.clone()),
        };

        Self {
            platform,
            policy: RefreshPolicy::for_platform(platform),
            endpoint,
            store,
            http,
            locks,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Return a credential that is safe to use right now
    pub async fn ensure_valid(&self, user_id: &str) -> Result<CredentialRecord, CredentialError> {
        let record = self.load(user_id).await?;
        let now = Utc::now();

        if !self.policy.is_due(&record, now) {
            return Ok(record);
        }

        if self.policy.too_young_to_refresh(&record, now) {
            debug!(
                platform = %self.platform,
                user_id,
                "Token inside minimum refresh age, using current token"
            );
            return Ok(record);
        }

        let _guard = self.locks.lock(user_id, self.platform).await;

        // Another caller may have refreshed while we waited
        let record = self.load(user_id).await?;
        if !self.policy.is_due(&record, Utc::now()) {
            return Ok(record);
        }

        self.refresh_locked(user_id, record).await
    }

    /// Drop the stored credential after the platform rejected it
    pub async fn invalidate(&self, user_id: &str) -> Result<(), CredentialError> {
        warn!(platform = %self.platform, user_id, "Clearing rejected credential");
        self.store
            .clear(user_id, self.platform)
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))
    }

    async fn load(&self, user_id: &str) -> Result<CredentialRecord, CredentialError> {
        let record = self
            .store
            .get(user_id, self.platform)
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?;

        match record {
            Some(record) if record.is_connected() => Ok(record),
            _ => Err(CredentialError::Missing {
                platform: self.platform,
                user_id: user_id.to_string(),
            }),
        }
    }

    async fn refresh_locked(
        &self,
        user_id: &str,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, CredentialError> {
        if self.policy.requires_refresh_token && record.refresh_token.is_none() {
            return Err(CredentialError::Expired {
                platform: self.platform,
                reason: "no refresh token stored".to_string(),
            });
        }

        info!(platform = %self.platform, user_id, "Refreshing access token");

        let outcome = match &self.endpoint {
            RefreshEndpoint::Instagram(cfg) => instagram::refresh(&self.http, cfg, &record).await,
            RefreshEndpoint::Facebook(cfg) => facebook::refresh(&self.http, cfg, &record).await,
            RefreshEndpoint::YouTube(cfg) => youtube::refresh(&self.http, cfg, &record).await,
            RefreshEndpoint::TikTok(cfg) => tiktok::refresh(&self.http, cfg, &record).await,
        };

        match outcome {
            Ok(patch) => {
                let mut refreshed = record;
                patch.apply_to(&mut refreshed);
                self.store
                    .set(user_id, self.platform, patch)
                    .await
                    .map_err(|e| CredentialError::Store(e.to_string()))?;
                info!(
                    platform = %self.platform,
                    user_id,
                    expires_at = ?refreshed.expires_at,
                    "Access token refreshed"
                );
                Ok(refreshed)
            }
            Err(RefreshFailure::Revoked(reason)) => {
                warn!(platform = %self.platform, user_id, %reason, "Refresh rejected, clearing credential");
                self.store
                    .clear(user_id, self.platform)
                    .await
                    .map_err(|e| CredentialError::Store(e.to_string()))?;
                Err(CredentialError::Expired {
                    platform: self.platform,
                    reason,
                })
            }
            Err(RefreshFailure::Transient(reason)) => {
                warn!(platform = %self.platform, user_id, %reason, "Refresh failed transiently");
                Err(CredentialError::RefreshTransient {
                    platform: self.platform,
                    reason,
                })
            }
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("platform", &self.platform)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Expiry from an `expires_in` seconds field
pub(crate) fn expiry_from(now: DateTime<Utc>, expires_in: Option<i64>, fallback: Duration) -> DateTime<Utc> {
    match expires_in {
        Some(secs) if secs > 0 => now + Duration::seconds(secs),
        _ => now + fallback,
    }
}

/// Classify a token endpoint response and decode its body
///
/// 429, 5xx and Graph throttling codes are transient; other 400, 401 and 403
/// responses mean the grant was rejected.
pub(crate) async fn read_token_response<T: DeserializeOwned>(
    result: Result<Response, HttpError>,
) -> Result<T, RefreshFailure> {
    let response = result.map_err(|e| RefreshFailure::Transient(e.to_string()))?;
    let status = response.status();

    let body = response
        .text()
        .await
        .map_err(|e| RefreshFailure::Transient(format!("failed to read token response: {}", HttpError::from(e))))?;

    if !status.is_success() {
        return Err(classify_rejection(status, &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| RefreshFailure::Transient(format!("malformed token response: {}", e)))
}

fn classify_rejection(status: StatusCode, body: &str) -> RefreshFailure {
    let reason = format!("{}: {}", status, truncate(body));
    if GraphError::parse(body).is_some_and(|e| e.is_rate_limit()) {
        return RefreshFailure::Transient(reason);
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RefreshFailure::Revoked(reason)
        }
        _ => RefreshFailure::Transient(reason),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(256).collect()
}
