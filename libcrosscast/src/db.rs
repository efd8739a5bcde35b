//! SQLite persistence for credentials and scheduled posts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::credentials::{CredentialPatch, CredentialRecord};
use crate::error::{CredentialError, CrosscastError, DbError, Result};
use crate::store::{CredentialStore, ScheduledPostStore};
use crate::types::{Platform, PostContent, PostStatus, PublishResult, ScheduledPost, StatusPatch};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::CorruptRow(format!("timestamp out of range: {}", millis)).into())
}

fn from_millis_opt(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file when missing
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    fn credential_from_row(row: &SqliteRow) -> Result<CredentialRecord> {
        let platform: String = row.get("platform");
        let platform = platform
            .parse::<Platform>()
            .map_err(DbError::CorruptRow)?;
        let scopes: String = row.get("granted_scopes");

        Ok(CredentialRecord {
            platform,
            user_id: row.get("user_id"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            expires_at: from_millis_opt(row.get("expires_at"))?,
            issued_at: from_millis_opt(row.get("issued_at"))?,
            external_account_id: row.get("external_account_id"),
            external_account_name: row.get("external_account_name"),
            granted_scopes: serde_json::from_str(&scopes).map_err(DbError::Serialization)?,
        })
    }

    fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
        let platforms: String = row.get("platforms");
        let results: String = row.get("platform_results");
        let status: String = row.get("status");

        Ok(ScheduledPost {
            id: row.get("id"),
            user_id: row.get("user_id"),
            platforms: serde_json::from_str(&platforms).map_err(DbError::Serialization)?,
            content: PostContent {
                caption: row.get("caption"),
                image_url: row.get("image_url"),
                video_url: row.get("video_url"),
                privacy_level: row.get("privacy_level"),
            },
            scheduled_at: from_millis(row.get("scheduled_at"))?,
            status: status.parse::<PostStatus>().map_err(DbError::CorruptRow)?,
            retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
            max_retries: row.get::<i64, _>("max_retries").max(0) as u32,
            platform_results: serde_json::from_str::<Vec<PublishResult>>(&results)
                .map_err(DbError::Serialization)?,
        })
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn get(&self, user_id: &str, platform: Platform) -> Result<Option<CredentialRecord>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, platform, access_token, refresh_token, expires_at, issued_at,
                   external_account_id, external_account_name, granted_scopes
            FROM credentials WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(Self::credential_from_row).transpose()
    }

    async fn set(&self, user_id: &str, platform: Platform, patch: CredentialPatch) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let existing = sqlx::query(
            r#"
            SELECT user_id, platform, access_token, refresh_token, expires_at, issued_at,
                   external_account_id, external_account_name, granted_scopes
            FROM credentials WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let record = match existing {
            Some(row) => {
                let mut record = Self::credential_from_row(&row)?;
                patch.apply_to(&mut record);
                record
            }
            None => patch.into_record(platform, user_id).ok_or_else(|| {
                CrosscastError::Credential(CredentialError::Store(format!(
                    "cannot create {} credential for {} without an access token",
                    platform, user_id
                )))
            })?,
        };

        let scopes = serde_json::to_string(&record.granted_scopes).map_err(DbError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, platform, access_token, refresh_token, expires_at,
                                     issued_at, external_account_id, external_account_name,
                                     granted_scopes, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                issued_at = excluded.issued_at,
                external_account_id = excluded.external_account_id,
                external_account_name = excluded.external_account_name,
                granted_scopes = excluded.granted_scopes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at.map(to_millis))
        .bind(record.issued_at.map(to_millis))
        .bind(&record.external_account_id)
        .bind(&record.external_account_name)
        .bind(scopes)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn clear(&self, user_id: &str, platform: Platform) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE user_id = ? AND platform = ?")
            .bind(user_id)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[async_trait]
impl ScheduledPostStore for Database {
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platforms, caption, image_url, video_url, privacy_level,
                   scheduled_at, status, retry_count, max_retries, platform_results
            FROM scheduled_posts
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY scheduled_at ASC, id ASC
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(Self::post_from_row).collect()
    }

    async fn claim(&self, id: &str) -> Result<bool> {
        let claimed = sqlx::query(
            "UPDATE scheduled_posts SET status = 'executing' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(claimed.rows_affected() == 1)
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> Result<()> {
        let results = patch
            .platform_results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DbError::Serialization)?;

        let updated = sqlx::query(
            r#"
            UPDATE scheduled_posts SET
                status = COALESCE(?, status),
                retry_count = COALESCE(?, retry_count),
                scheduled_at = COALESCE(?, scheduled_at),
                platform_results = COALESCE(?, platform_results)
            WHERE id = ?
            "#,
        )
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.retry_count.map(i64::from))
        .bind(patch.scheduled_at.map(to_millis))
        .bind(results)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            return Err(CrosscastError::InvalidInput(format!(
                "Scheduled post not found: {}",
                id
            )));
        }
        Ok(())
    }

    async fn schedule(&self, post: &ScheduledPost) -> Result<()> {
        let platforms = serde_json::to_string(&post.platforms).map_err(DbError::Serialization)?;
        let results =
            serde_json::to_string(&post.platform_results).map_err(DbError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (id, user_id, platforms, caption, image_url, video_url,
                                         privacy_level, scheduled_at, status, retry_count,
                                         max_retries, platform_results, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(platforms)
        .bind(&post.content.caption)
        .bind(&post.content.image_url)
        .bind(&post.content.video_url)
        .bind(&post.content.privacy_level)
        .bind(to_millis(post.scheduled_at))
        .bind(post.status.as_str())
        .bind(i64::from(post.retry_count))
        .bind(i64::from(post.max_retries))
        .bind(results)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platforms, caption, image_url, video_url, privacy_level,
                   scheduled_at, status, retry_count, max_retries, platform_results
            FROM scheduled_posts WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(Self::post_from_row).transpose()
    }
}
