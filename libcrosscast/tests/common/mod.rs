//! Shared fixtures for integration tests

#![allow(dead_code)]

use axum::Router;
use libcrosscast::config::{Config, FacebookConfig, HttpConfig};
use libcrosscast::credentials::CredentialRecord;
use libcrosscast::http::HttpClient;
use libcrosscast::rate_limiter::AdmissionLimiter;
use libcrosscast::Platform;
use std::sync::Arc;

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn fast_http_config() -> HttpConfig {
    HttpConfig {
        max_concurrent: 8,
        min_spacing_ms: 0,
        timeout_secs: 5,
        max_retries: 0,
        retry_min_delay_ms: 5,
        ..Default::default()
    }
}

pub fn http_client() -> HttpClient {
    let config = fast_http_config();
    HttpClient::new(&config, Arc::new(AdmissionLimiter::from_config(&config))).unwrap()
}

/// Config whose Facebook Graph API points at `base` with version `v1`
pub fn facebook_config(base: &str) -> Config {
    Config {
        http: fast_http_config(),
        facebook: FacebookConfig {
            api_base: base.to_string(),
            api_version: "v1".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn page_credential(user_id: &str) -> CredentialRecord {
    let mut record = CredentialRecord::new(Platform::Facebook, user_id, "page-token");
    record.external_account_id = "page1".to_string();
    record.external_account_name = "Test Page".to_string();
    record
}
