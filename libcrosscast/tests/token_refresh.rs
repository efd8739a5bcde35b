//! Token lifecycle against fixture OAuth endpoints

mod common;

use axum::{extract::State, http::StatusCode, routing::{get, post}, Form, Json, Router};
use chrono::{Duration, Utc};
use libcrosscast::config::{Config, InstagramConfig, TikTokConfig, YouTubeConfig};
use libcrosscast::credentials::{CredentialRecord, RefreshLocks};
use libcrosscast::error::CredentialError;
use libcrosscast::tokens::TokenManager;
use libcrosscast::{CredentialStore, MemoryStore, Platform};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct TokenEndpoint {
    hits: Arc<AtomicUsize>,
    status: StatusCode,
}

async fn google_token_server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/token",
            post(
                |State(endpoint): State<TokenEndpoint>, Form(form): Form<HashMap<String, String>>| async move {
                    endpoint.hits.fetch_add(1, Ordering::SeqCst);
                    // Slow enough for concurrent callers to pile up on the lock
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    if endpoint.status != StatusCode::OK {
                        return (endpoint.status, Json(json!({"error": "invalid_grant"})));
                    }
                    assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
                    assert_eq!(form.get("refresh_token").map(String::as_str), Some("refresh-1"));
                    (
                        StatusCode::OK,
                        Json(json!({
                            "access_token": "access-2",
                            "expires_in": 3599,
                            "scope": "https://www.googleapis.com/auth/youtube.upload",
                            "token_type": "Bearer"
                        })),
                    )
                },
            ),
        )
        .with_state(TokenEndpoint {
            hits: hits.clone(),
            status,
        });
    (common::spawn(router).await, hits)
}

fn manager(platform: Platform, config: &Config, store: Arc<MemoryStore>) -> TokenManager {
    TokenManager::new(
        platform,
        config,
        store,
        common::http_client(),
        Arc::new(RefreshLocks::new()),
    )
}

fn youtube_config(base: &str) -> Config {
    Config {
        youtube: YouTubeConfig {
            token_url: format!("{}/token", base),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn expiring_youtube_credential() -> CredentialRecord {
    let mut record = CredentialRecord::new(Platform::YouTube, "u1", "access-1");
    record.refresh_token = Some("refresh-1".to_string());
    record.expires_at = Some(Utc::now() + Duration::minutes(2));
    record
}

#[tokio::test]
async fn test_due_credential_is_refreshed_once_under_concurrency() {
    let (base, hits) = google_token_server(StatusCode::OK).await;
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(expiring_youtube_credential());
    let tokens = manager(Platform::YouTube, &youtube_config(&base), store.clone());

    let (a, b, c) = tokio::join!(
        tokens.ensure_valid("u1"),
        tokens.ensure_valid("u1"),
        tokens.ensure_valid("u1")
    );

    for record in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert_eq!(record.access_token, "access-2");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let stored = CredentialStore::get(store.as_ref(), "u1", Platform::YouTube)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "access-2");
    // Google did not rotate it, so the old one is kept
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert!(stored.expires_at.unwrap() > Utc::now() + Duration::minutes(55));
    assert!(stored.has_scope("https://www.googleapis.com/auth/youtube.upload"));

    // Fresh now, so no further refresh
    tokens.ensure_valid("u1").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_revoked_refresh_token_clears_credential() {
    let (base, _hits) = google_token_server(StatusCode::BAD_REQUEST).await;
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(expiring_youtube_credential());
    let tokens = manager(Platform::YouTube, &youtube_config(&base), store.clone());

    let err = tokens.ensure_valid("u1").await.unwrap_err();
    assert!(matches!(err, CredentialError::Expired { .. }));
    assert!(CredentialStore::get(store.as_ref(), "u1", Platform::YouTube)
        .await
        .unwrap()
        .is_none());

    let err = tokens.ensure_valid("u1").await.unwrap_err();
    assert!(matches!(err, CredentialError::Missing { .. }));
}

#[tokio::test]
async fn test_token_endpoint_outage_is_transient_and_keeps_credential() {
    let (base, _hits) = google_token_server(StatusCode::SERVICE_UNAVAILABLE).await;
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(expiring_youtube_credential());
    let tokens = manager(Platform::YouTube, &youtube_config(&base), store.clone());

    let err = tokens.ensure_valid("u1").await.unwrap_err();
    assert!(matches!(err, CredentialError::RefreshTransient { .. }));
    assert!(err.is_retryable());

    let stored = CredentialStore::get(store.as_ref(), "u1", Platform::YouTube)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "access-1");
}

#[tokio::test]
async fn test_tiktok_refresh_rotates_refresh_token_and_scopes() {
    let router = Router::new().route(
        "/v2/oauth/token/",
        post(|Form(form): Form<HashMap<String, String>>| async move {
            assert_eq!(form.get("client_key").map(String::as_str), Some("ck"));
            Json(json!({
                "access_token": "act.2",
                "expires_in": 86400,
                "refresh_token": "rft.2",
                "refresh_expires_in": 31536000,
                "open_id": "open-1",
                "scope": "user.info.basic,video.publish",
                "token_type": "Bearer"
            }))
        }),
    );
    let base = common::spawn(router).await;
    let config = Config {
        tiktok: TikTokConfig {
            api_base: base,
            client_key: "ck".to_string(),
            client_secret: "cs".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    let store = Arc::new(MemoryStore::new());
    let mut record = CredentialRecord::new(Platform::TikTok, "u1", "act.1");
    record.refresh_token = Some("rft.1".to_string());
    record.expires_at = Some(Utc::now() - Duration::minutes(1));
    record.granted_scopes = vec!["user.info.basic".to_string()];
    store.insert_credential(record);

    let refreshed = manager(Platform::TikTok, &config, store.clone())
        .ensure_valid("u1")
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "act.2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rft.2"));
    assert!(refreshed.has_scope("video.publish"));
}

#[tokio::test]
async fn test_tiktok_error_body_on_200_revokes() {
    let router = Router::new().route(
        "/v2/oauth/token/",
        post(|| async {
            Json(json!({"error": "invalid_grant", "error_description": "Refresh token is invalid or expired."}))
        }),
    );
    let base = common::spawn(router).await;
    let config = Config {
        tiktok: TikTokConfig {
            api_base: base,
            ..Default::default()
        },
        ..Default::default()
    };

    let store = Arc::new(MemoryStore::new());
    let mut record = CredentialRecord::new(Platform::TikTok, "u1", "act.1");
    record.refresh_token = Some("rft.1".to_string());
    record.expires_at = Some(Utc::now());
    store.insert_credential(record);

    let err = manager(Platform::TikTok, &config, store.clone())
        .ensure_valid("u1")
        .await
        .unwrap_err();

    assert!(matches!(err, CredentialError::Expired { .. }));
    assert!(CredentialStore::get(store.as_ref(), "u1", Platform::TikTok)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_instagram_skips_refresh_inside_minimum_age() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/refresh_access_token",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({"access_token": "ig-2", "token_type": "bearer", "expires_in": 5183944}))
            }
        }),
    );
    let base = common::spawn(router).await;
    let config = Config {
        instagram: InstagramConfig {
            api_base: base,
            ..Default::default()
        },
        ..Default::default()
    };

    let store = Arc::new(MemoryStore::new());
    let mut young = CredentialRecord::new(Platform::Instagram, "young", "ig-young");
    young.expires_at = Some(Utc::now() + Duration::days(3));
    young.issued_at = Some(Utc::now() - Duration::hours(2));
    store.insert_credential(young);

    let mut old = CredentialRecord::new(Platform::Instagram, "old", "ig-old");
    old.expires_at = Some(Utc::now() + Duration::days(3));
    old.issued_at = Some(Utc::now() - Duration::days(57));
    store.insert_credential(old);

    let tokens = manager(Platform::Instagram, &config, store);

    let record = tokens.ensure_valid("young").await.unwrap();
    assert_eq!(record.access_token, "ig-young");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let record = tokens.ensure_valid("old").await.unwrap();
    assert_eq!(record.access_token, "ig-2");
    assert!(record.expires_at.unwrap() > Utc::now() + Duration::days(59));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
