//! Multi-platform publish dispatch
//!
//! [`PublishDispatcher`] fans one request out to every requested platform.
//! Each platform lane runs `ensure_valid -> publish -> invalidate on
//! credential rejection` independently; lanes run concurrently and a panic in
//! one lane becomes an `unknown` result for that platform only.

use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::credentials::RefreshLocks;
use crate::error::{CredentialError, Result};
use crate::http::HttpClient;
use crate::platforms::{Adapter, PublishInput};
use crate::rate_limiter::AdmissionLimiter;
use crate::store::CredentialStore;
use crate::tokens::TokenManager;
use crate::types::{DispatchRequest, FailReason, Platform, PublishResult};

/// Token manager and adapter for one platform
#[derive(Clone)]
struct Lane {
    tokens: TokenManager,
    adapter: Adapter,
}

/// Publishes one request to several platforms concurrently
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use libcrosscast::config::Config;
/// use libcrosscast::poster::PublishDispatcher;
/// use libcrosscast::store::MemoryStore;
/// use libcrosscast::types::DispatchRequest;
///
/// # async fn example() -> libcrosscast::error::Result<()> {
/// let config = Config::load()?;
/// let dispatcher = PublishDispatcher::from_config(&config, Arc::new(MemoryStore::new()))?;
///
/// let results = dispatcher
///     .dispatch(&DispatchRequest {
///         caption: "Launch day".to_string(),
///         platforms: vec!["facebook".to_string()],
///         user_id: "user-1".to_string(),
///         ..Default::default()
///     })
///     .await;
///
/// for result in results {
///     println!("{}: {}", result.platform, result.success);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PublishDispatcher {
    lanes: HashMap<Platform, Lane>,
}

impl PublishDispatcher {
    /// Build lanes for every platform over a shared client and store
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>, http: HttpClient) -> Self {
        let locks = Arc::new(RefreshLocks::new());

        let lanes = Platform::ALL
            .iter()
            .map(|&platform| {
                let lane = Lane {
                    tokens: TokenManager::new(
                        platform,
                        config,
                        store.clone(),
                        http.clone(),
                        locks.clone(),
                    ),
                    adapter: Adapter::for_platform(platform, config, http.clone()),
                };
                (platform, lane)
            })
            .collect();

        Self { lanes }
    }

    /// Build the process-wide limiter and client from configuration
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let limiter = Arc::new(AdmissionLimiter::from_config(&config.http));
        let http = HttpClient::new(&config.http, limiter)?;
        Ok(Self::new(config, store, http))
    }

    /// Publish to every requested platform
    ///
    /// Returns exactly one result per requested platform name, in request
    /// order. Never fails as a whole; every problem is a per-platform result.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Vec<PublishResult> {
        info!(
            user_id = %request.user_id,
            platforms = ?request.platforms,
            "Dispatching publish request"
        );

        let lanes = request
            .platforms
            .iter()
            .map(|name| self.dispatch_one(name, request));

        join_all(lanes).await
    }

    async fn dispatch_one(&self, name: &str, request: &DispatchRequest) -> PublishResult {
        let Some((platform, lane)) = name
            .parse::<Platform>()
            .ok()
            .and_then(|platform| self.lanes.get(&platform).map(|lane| (platform, lane)))
        else {
            warn!(platform = name, "Unsupported platform requested");
            return PublishResult::failure(
                name,
                FailReason::UnsupportedPlatform,
                format!("Platform '{}' is not supported", name),
            );
        };

        match AssertUnwindSafe(run_lane(platform, lane, request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%platform, user_id = %request.user_id, %message, "Publish panicked");
                PublishResult::failure(
                    platform.as_str(),
                    FailReason::Unknown,
                    format!("Unexpected internal error while publishing: {}", message),
                )
            }
        }
    }
}

async fn run_lane(platform: Platform, lane: &Lane, request: &DispatchRequest) -> PublishResult {
    let credential = match lane.tokens.ensure_valid(&request.user_id).await {
        Ok(credential) => credential,
        Err(e) => {
            warn!(%platform, user_id = %request.user_id, "Credential unavailable: {}", e);
            return credential_failure(platform, &e);
        }
    };

    let input = PublishInput {
        caption: request.caption.clone(),
        image_url: request.image_url.clone(),
        video_url: request.video_url.clone(),
        privacy_level: request.privacy_level.clone(),
        credential,
    };

    let result = lane.adapter.publish(input).await;

    if result.success {
        info!(%platform, id = ?result.external_id, "Published");
    } else if result.fail_reason.is_some_and(|r| r.invalidates_credential()) {
        if let Err(e) = lane.tokens.invalidate(&request.user_id).await {
            warn!(%platform, user_id = %request.user_id, "Failed to clear credential: {}", e);
        }
    } else {
        warn!(%platform, reason = ?result.fail_reason, error = ?result.error, "Publish failed");
    }

    result
}

/// Map a token layer failure to a publish result
pub fn credential_failure(platform: Platform, error: &CredentialError) -> PublishResult {
    let (reason, hint) = match error {
        CredentialError::Missing { .. } => (
            FailReason::CredentialMissing,
            format!("Connect a {} account before publishing", platform),
        ),
        CredentialError::Expired { .. } => (
            FailReason::CredentialExpired,
            format!("Reconnect your {} account", platform),
        ),
        CredentialError::RefreshTransient { .. } | CredentialError::Store(_) => (
            FailReason::CredentialRefreshTransient,
            "Try again in a few minutes".to_string(),
        ),
    };

    PublishResult::failure(platform.as_str(), reason, error.to_string()).with_recommendations(vec![hint])
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
