//! Scheduled post reconciliation
//!
//! Each pass picks the pending posts that are due and walks them through
//! `pending -> executing -> {completed | failed | pending (retry)}`. A post is
//! claimed with a compare-and-set before anything is published, so passes
//! running side by side never publish the same cycle twice. Posts in a batch
//! are reconciled concurrently; a panic while handling one post is finalized
//! as a failed cycle for that post only.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::config::SchedulingConfig;
use crate::error::{CrosscastError, Result};
use crate::poster::PublishDispatcher;
use crate::store::ScheduledPostStore;
use crate::types::{PostStatus, PublishResult, ScheduledPost, StatusPatch};

/// Outcome of one post in a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReport {
    pub post_id: String,
    pub status: PostStatus,
    pub platforms: Vec<PublishResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub processed_count: usize,
    pub results: Vec<PostReport>,
}

pub struct Reconciler {
    posts: Arc<dyn ScheduledPostStore>,
    dispatcher: Arc<PublishDispatcher>,
    retry_delay: Duration,
    trigger_secret: Option<String>,
}

impl Reconciler {
    pub fn new(
        posts: Arc<dyn ScheduledPostStore>,
        dispatcher: Arc<PublishDispatcher>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            posts,
            dispatcher,
            retry_delay: config.retry_delay(),
            trigger_secret: config
                .trigger_secret
                .clone()
                .filter(|secret| !secret.is_empty()),
        }
    }

    /// Run a pass on behalf of an external trigger
    ///
    /// The secret is compared in constant time. Without a configured secret
    /// every trigger is refused.
    pub async fn trigger(&self, secret: &str, now: DateTime<Utc>) -> Result<ReconcileSummary> {
        let Some(expected) = self.trigger_secret.as_deref() else {
            return Err(CrosscastError::Unauthorized(
                "No reconciler trigger secret is configured".to_string(),
            ));
        };

        if !bool::from(secret.as_bytes().ct_eq(expected.as_bytes())) {
            warn!("Rejected reconciler trigger with a wrong secret");
            return Err(CrosscastError::Unauthorized(
                "Invalid reconciler trigger secret".to_string(),
            ));
        }

        self.run_once(now).await
    }

    /// Reconcile every post due at `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileSummary> {
        let due = self.posts.list_due(now).await?;
        if due.is_empty() {
            debug!("No scheduled posts due");
            return Ok(ReconcileSummary::default());
        }

        info!(count = due.len(), "Reconciling due posts");

        let reports = join_all(due.into_iter().map(|post| self.reconcile_guarded(post, now))).await;
        let results: Vec<PostReport> = reports.into_iter().flatten().collect();

        Ok(ReconcileSummary {
            processed_count: results.len(),
            results,
        })
    }

    async fn reconcile_guarded(&self, post: ScheduledPost, now: DateTime<Utc>) -> Option<PostReport> {
        match self.posts.claim(&post.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(post_id = %post.id, "Post already claimed or no longer pending");
                return None;
            }
            Err(e) => {
                error!(post_id = %post.id, "Failed to claim post: {}", e);
                return None;
            }
        }

        let fallback = post.clone();

        match AssertUnwindSafe(self.execute(post, now)).catch_unwind().await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                error!(post_id = %fallback.id, "Failed to reconcile post: {}", e);
                self.release(&fallback.id).await;
                None
            }
            Err(_) => {
                error!(post_id = %fallback.id, "Reconciling post panicked");
                let patch = cycle_patch(&fallback, fallback.platform_results.clone(), now, self.retry_delay);
                let status = patch.status.unwrap_or(PostStatus::Failed);
                if let Err(e) = self.posts.update_status(&fallback.id, patch).await {
                    error!(post_id = %fallback.id, "Failed to record panicked cycle: {}", e);
                    self.release(&fallback.id).await;
                }
                Some(PostReport {
                    post_id: fallback.id,
                    status,
                    platforms: fallback.platform_results,
                })
            }
        }
    }

    /// Put a claimed post back in the queue after a store failure
    async fn release(&self, id: &str) {
        match self
            .posts
            .update_status(id, StatusPatch::status(PostStatus::Pending))
            .await
        {
            Ok(()) => warn!(post_id = id, "Returned post to the queue after a store failure"),
            Err(e) => error!(post_id = id, "Post is stuck in executing: {}", e),
        }
    }

    /// Run one cycle of a post this pass has claimed
    async fn execute(&self, post: ScheduledPost, now: DateTime<Utc>) -> Result<PostReport> {
        // The listed copy may predate the last cycle's results
        let current = self.posts.get(&post.id).await?.unwrap_or(post);

        let outstanding = current.outstanding_platforms();
        info!(
            post_id = %current.id,
            attempt = current.retry_count + 1,
            platforms = ?outstanding,
            "Executing scheduled post"
        );

        let fresh = self.dispatcher.dispatch(&current.dispatch_request(outstanding)).await;
        let merged = merge_results(&current.platform_results, fresh);

        let patch = cycle_patch(&current, merged.clone(), now, self.retry_delay);
        let status = patch.status.unwrap_or(PostStatus::Failed);
        self.posts.update_status(&current.id, patch).await?;

        match status {
            PostStatus::Completed => info!(post_id = %current.id, "Scheduled post completed"),
            PostStatus::Pending => warn!(post_id = %current.id, "Scheduled post will be retried"),
            _ => warn!(post_id = %current.id, "Scheduled post failed permanently"),
        }

        Ok(PostReport {
            post_id: current.id,
            status,
            platforms: merged,
        })
    }
}

/// Replace stored results platform by platform, keeping earlier ones that
/// were not retried
pub fn merge_results(previous: &[PublishResult], fresh: Vec<PublishResult>) -> Vec<PublishResult> {
    let mut merged: Vec<PublishResult> = previous
        .iter()
        .filter(|old| !fresh.iter().any(|new| new.is_for(&old.platform)))
        .cloned()
        .collect();
    merged.extend(fresh);
    merged
}

/// Status transition after one dispatch cycle
pub fn cycle_patch(
    post: &ScheduledPost,
    results: Vec<PublishResult>,
    now: DateTime<Utc>,
    retry_delay: Duration,
) -> StatusPatch {
    let all_done = !post.platforms.is_empty()
        && post
            .platforms
            .iter()
            .all(|name| results.iter().any(|r| r.success && r.is_for(name)));

    if all_done {
        return StatusPatch {
            status: Some(PostStatus::Completed),
            platform_results: Some(results),
            ..Default::default()
        };
    }

    let retry_count = post.retry_count + 1;
    if retry_count < post.max_retries {
        StatusPatch {
            status: Some(PostStatus::Pending),
            retry_count: Some(retry_count),
            scheduled_at: Some(now + retry_delay),
            platform_results: Some(results),
        }
    } else {
        StatusPatch {
            status: Some(PostStatus::Failed),
            retry_count: Some(retry_count),
            scheduled_at: None,
            platform_results: Some(results),
        }
    }
}
