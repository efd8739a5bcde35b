//! Helpers for unit tests that talk to in-process fixture servers

use axum::Router;
use std::sync::Arc;

use crate::config::HttpConfig;
use crate::http::HttpClient;
use crate::rate_limiter::AdmissionLimiter;

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Client with no spacing and fast retries
pub fn fast_http_config() -> HttpConfig {
    HttpConfig {
        max_concurrent: 8,
        min_spacing_ms: 0,
        timeout_secs: 5,
        max_retries: 1,
        retry_min_delay_ms: 5,
        ..Default::default()
    }
}

pub fn http_client() -> HttpClient {
    let config = fast_http_config();
    HttpClient::new(&config, Arc::new(AdmissionLimiter::from_config(&config))).unwrap()
}
