//! Platform credential records
//!
//! A [`CredentialRecord`] is created by the external OAuth flow and from then
//! on only mutated by the token lifecycle managers in [`crate::tokens`].
//! [`RefreshLocks`] serializes refreshes of the same (user, platform) pair
//! inside one process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::Platform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub platform: Platform,
    pub user_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the current access token was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_account_id: String,
    #[serde(default)]
    pub external_account_name: String,
    #[serde(default)]
    pub granted_scopes: Vec<String>,
}

impl CredentialRecord {
    pub fn new(platform: Platform, user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            platform,
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            issued_at: None,
            external_account_id: String::new(),
            external_account_name: String::new(),
            granted_scopes: Vec::new(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// A record is only usable with a non-empty access token
    pub fn is_connected(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    pub fn expires_within(&self, now: DateTime<Utc>, lookahead: chrono::Duration) -> Option<bool> {
        self.expires_at.map(|at| at <= now + lookahead)
    }
}

/// Partial credential update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialPatch {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub external_account_id: Option<String>,
    pub external_account_name: Option<String>,
    pub granted_scopes: Option<Vec<String>>,
}

impl CredentialPatch {
    /// Patch carrying every field of an existing record
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self {
            access_token: Some(record.access_token.clone()),
            refresh_token: record.refresh_token.clone(),
            expires_at: record.expires_at,
            issued_at: record.issued_at,
            external_account_id: Some(record.external_account_id.clone()),
            external_account_name: Some(record.external_account_name.clone()),
            granted_scopes: Some(record.granted_scopes.clone()),
        }
    }

    pub fn apply_to(&self, record: &mut CredentialRecord) {
        if let Some(token) = &self.access_token {
            record.access_token = token.clone();
        }
        if let Some(token) = &self.refresh_token {
            record.refresh_token = Some(token.clone());
        }
        if let Some(at) = self.expires_at {
            record.expires_at = Some(at);
        }
        if let Some(at) = self.issued_at {
            record.issued_at = Some(at);
        }
        if let Some(id) = &self.external_account_id {
            record.external_account_id = id.clone();
        }
        if let Some(name) = &self.external_account_name {
            record.external_account_name = name.clone();
        }
        if let Some(scopes) = &self.granted_scopes {
            record.granted_scopes = scopes.clone();
        }
    }

    /// Materialize a new record; `None` without an access token
    pub fn into_record(self, platform: Platform, user_id: &str) -> Option<CredentialRecord> {
        let access_token = self.access_token.clone()?;
        let mut record = CredentialRecord::new(platform, user_id, access_token);
        self.apply_to(&mut record);
        Some(record)
    }
}

type LockKey = (String, Platform);

type KeyedLocks = HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>;

/// Keyed async locks, one per (user, platform)
///
/// Entries exist only while some caller holds or waits on them.
#[derive(Debug, Default)]
pub struct RefreshLocks {
    locks: Mutex<KeyedLocks>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, KeyedLocks> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire the refresh lock for one credential
    pub async fn lock(&self, user_id: &str, platform: Platform) -> RefreshGuard<'_> {
        let key = (user_id.to_string(), platform);
        let lock = self.entries().entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        RefreshGuard {
            guard: Some(guard),
            key,
            locks: self,
        }
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held refresh lock; the map entry is dropped with the last user
pub struct RefreshGuard<'a> {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    key: LockKey,
    locks: &'a RefreshLocks,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        // Release first so the mutex's own Arc is gone before counting
        self.guard.take();

        let mut entries = self.locks.entries();
        if entries
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.key);
        }
    }
}
