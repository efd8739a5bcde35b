//! Persistence interfaces for credentials and scheduled posts
//!
//! The engine only needs keyed get/set/list access. [`MemoryStore`] keeps
//! everything in process; [`crate::db::Database`] persists to SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::error::{CredentialError, CrosscastError, Result};
use crate::types::{Platform, PostStatus, ScheduledPost, StatusPatch};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, platform: Platform) -> Result<Option<CredentialRecord>>;

    /// Merge `patch` into the stored record, creating it when absent
    async fn set(&self, user_id: &str, platform: Platform, patch: CredentialPatch) -> Result<()>;

    async fn clear(&self, user_id: &str, platform: Platform) -> Result<()>;
}

#[async_trait]
pub trait ScheduledPostStore: Send + Sync {
    /// Pending posts with `scheduled_at <= now`, oldest first
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>>;

    /// Move a post from `pending` to `executing` in one step
    ///
    /// Returns `false` when the post is missing or no longer pending, so at
    /// most one caller ever wins a given cycle.
    async fn claim(&self, id: &str) -> Result<bool>;

    async fn update_status(&self, id: &str, patch: StatusPatch) -> Result<()>;

    async fn schedule(&self, post: &ScheduledPost) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ScheduledPost>>;
}

/// In-process store implementing both interfaces
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: Mutex<HashMap<(String, Platform), CredentialRecord>>,
    posts: Mutex<HashMap<String, ScheduledPost>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a full credential record
    pub fn insert_credential(&self, record: CredentialRecord) {
        guard(&self.credentials).insert((record.user_id.clone(), record.platform), record);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, user_id: &str, platform: Platform) -> Result<Option<CredentialRecord>> {
        Ok(guard(&self.credentials)
            .get(&(user_id.to_string(), platform))
            .cloned())
    }

    async fn set(&self, user_id: &str, platform: Platform, patch: CredentialPatch) -> Result<()> {
        let mut credentials = guard(&self.credentials);
        let key = (user_id.to_string(), platform);

        if let Some(record) = credentials.get_mut(&key) {
            patch.apply_to(record);
            return Ok(());
        }

        let record = patch.into_record(platform, user_id).ok_or_else(|| {
            CrosscastError::Credential(CredentialError::Store(format!(
                "cannot create {} credential for {} without an access token",
                platform, user_id
            )))
        })?;
        credentials.insert(key, record);
        Ok(())
    }

    async fn clear(&self, user_id: &str, platform: Platform) -> Result<()> {
        guard(&self.credentials).remove(&(user_id.to_string(), platform));
        Ok(())
    }
}

#[async_trait]
impl ScheduledPostStore for MemoryStore {
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let mut due: Vec<ScheduledPost> = guard(&self.posts)
            .values()
            .filter(|p| p.status == PostStatus::Pending && p.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn claim(&self, id: &str) -> Result<bool> {
        let mut posts = guard(&self.posts);
        match posts.get_mut(id) {
            Some(post) if post.status == PostStatus::Pending => {
                post.status = PostStatus::Executing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> Result<()> {
        let mut posts = guard(&self.posts);
        let post = posts
            .get_mut(id)
            .ok_or_else(|| CrosscastError::InvalidInput(format!("Scheduled post not found: {}", id)))?;
        patch.apply(post);
        Ok(())
    }

    async fn schedule(&self, post: &ScheduledPost) -> Result<()> {
        guard(&self.posts).insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledPost>> {
        Ok(guard(&self.posts).get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostContent;

    fn post_at(at: DateTime<Utc>) -> ScheduledPost {
        ScheduledPost::new(
            "user-1".to_string(),
            vec!["facebook".to_string()],
            PostContent {
                caption: "hello".to_string(),
                ..Default::default()
            },
            at,
            3,
        )
    }

    #[tokio::test]
    async fn test_set_creates_then_merges() {
        let store = MemoryStore::new();
        let create = CredentialPatch {
            access_token: Some("a1".to_string()),
            refresh_token: Some("r1".to_string()),
            ..Default::default()
        };
        CredentialStore::set(&store, "u", Platform::YouTube, create).await.unwrap();

        let update = CredentialPatch {
            access_token: Some("a2".to_string()),
            ..Default::default()
        };
        CredentialStore::set(&store, "u", Platform::YouTube, update).await.unwrap();

        let record = CredentialStore::get(&store, "u", Platform::YouTube)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.access_token, "a2");
        assert_eq!(record.refresh_token.as_deref(), Some("r1"));
        assert_eq!(record.platform, Platform::YouTube);
    }

    #[tokio::test]
    async fn test_set_without_token_on_missing_record_fails() {
        let store = MemoryStore::new();
        let result = CredentialStore::set(&store, "u", Platform::TikTok, CredentialPatch::default()).await;
        assert!(matches!(
            result,
            Err(CrosscastError::Credential(CredentialError::Store(_)))
        ));
    }

    #[tokio::test]
    async fn test_clear_removes_only_that_platform() {
        let store = MemoryStore::new();
        store.insert_credential(CredentialRecord::new(Platform::Facebook, "u", "fb"));
        store.insert_credential(CredentialRecord::new(Platform::Instagram, "u", "ig"));

        store.clear("u", Platform::Facebook).await.unwrap();

        assert!(CredentialStore::get(&store, "u", Platform::Facebook).await.unwrap().is_none());
        assert!(CredentialStore::get(&store, "u", Platform::Instagram).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_due_filters_status_and_time() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let due = post_at(now - chrono::Duration::minutes(1));
        let future = post_at(now + chrono::Duration::minutes(10));
        let mut done = post_at(now - chrono::Duration::minutes(5));
        done.status = PostStatus::Completed;

        for post in [&due, &future, &done] {
            store.schedule(post).await.unwrap();
        }

        let listed = store.list_due(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
    }

    #[tokio::test]
    async fn test_claim_wins_once() {
        let store = MemoryStore::new();
        let post = post_at(Utc::now());
        store.schedule(&post).await.unwrap();

        assert!(store.claim(&post.id).await.unwrap());
        assert!(!store.claim(&post.id).await.unwrap());
        assert!(!store.claim("missing").await.unwrap());
        assert_eq!(
            ScheduledPostStore::get(&store, &post.id).await.unwrap().unwrap().status,
            PostStatus::Executing
        );
    }

    #[tokio::test]
    async fn test_update_status_unknown_post() {
        let store = MemoryStore::new();
        let result = store
            .update_status("missing", StatusPatch::status(PostStatus::Executing))
            .await;
        assert!(matches!(result, Err(CrosscastError::InvalidInput(_))));
    }
}
