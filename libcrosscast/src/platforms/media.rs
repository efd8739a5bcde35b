//! Remote media probing and download

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use thiserror::Error;

use crate::error::HttpError;
use crate::http::HttpClient;

/// Upper bound on the buffer reserved up front from a declared length
const PREALLOCATE_LIMIT: u64 = 64 * 1024 * 1024;

/// Facts learned from a HEAD request against a media URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl MediaInfo {
    pub fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("video/"))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub bytes: Bytes,
    pub content_type: String,
}

impl DownloadedMedia {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("media host answered {0}")]
    Status(StatusCode),

    #[error("media is at least {size} bytes, above the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("media body is empty")]
    Empty,
}

fn header_str(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// HEAD the URL without following up with a body download
pub async fn inspect(http: &HttpClient, url: &str) -> Result<MediaInfo, HttpError> {
    let response = http.request(Method::HEAD, url, |req| req).await?;
    let headers = response.headers();

    Ok(MediaInfo {
        status: response.status(),
        content_type: header_str(headers, CONTENT_TYPE),
        content_length: header_str(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
    })
}

/// Download the whole media body, refusing anything above `max_bytes`
///
/// The body is read as a stream and the transfer is abandoned as soon as the
/// running total passes the cap, whether or not the host sent a length.
pub async fn download(http: &HttpClient, url: &str, max_bytes: u64) -> Result<DownloadedMedia, MediaError> {
    let timeout = http.media_timeout();
    let response = http.request(Method::GET, url, |req| req.timeout(timeout)).await?;

    if !response.status().is_success() {
        return Err(MediaError::Status(response.status()));
    }

    if let Some(size) = response.content_length() {
        if size > max_bytes {
            return Err(MediaError::TooLarge { size, max: max_bytes });
        }
    }

    let content_type = header_str(response.headers(), CONTENT_TYPE)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let reserve = response.content_length().unwrap_or(0).min(PREALLOCATE_LIMIT);
    let mut body = BytesMut::with_capacity(reserve as usize);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HttpError::from)?;
        let size = (body.len() + chunk.len()) as u64;
        if size > max_bytes {
            return Err(MediaError::TooLarge { size, max: max_bytes });
        }
        body.extend_from_slice(&chunk);
    }

    if body.is_empty() {
        return Err(MediaError::Empty);
    }

    Ok(DownloadedMedia {
        bytes: body.freeze(),
        content_type,
    })
}
