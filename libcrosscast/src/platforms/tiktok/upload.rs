//! Chunk planning and byte transfer for TikTok FILE_UPLOAD sessions

use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Method;
use tracing::debug;

use crate::error::HttpError;
use crate::http::{body_preview, HttpClient};

pub const MIB: u64 = 1024 * 1024;

/// Videos below this size go up in a single transfer
pub const SINGLE_TRANSFER_LIMIT: u64 = 20 * MIB;

pub const CHUNK_SIZE: u64 = 10 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub video_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

impl ChunkPlan {
    /// Plan the transfer of `video_size` bytes
    ///
    /// Under 20 MiB the whole file is one transfer; above that it is split
    /// into 10 MiB chunks with the remainder as its own final chunk. An empty
    /// video has no chunks.
    pub fn for_size(video_size: u64) -> Self {
        if video_size == 0 {
            return Self {
                video_size,
                chunk_size: 0,
                total_chunks: 0,
            };
        }

        if video_size < SINGLE_TRANSFER_LIMIT {
            return Self {
                video_size,
                chunk_size: video_size,
                total_chunks: 1,
            };
        }

        Self {
            video_size,
            chunk_size: CHUNK_SIZE,
            total_chunks: video_size.div_ceil(CHUNK_SIZE),
        }
    }

    /// Inclusive byte ranges, one per chunk
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.total_chunks)
            .map(move |index| index * self.chunk_size)
            .take_while(move |start| *start < self.video_size)
            .map(move |start| {
                let end = (start + self.chunk_size).min(self.video_size) - 1;
                (start, end)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.total_chunks == 0
    }
}

/// Upload session handed out by the init endpoint; lives for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TikTokUploadSession {
    pub publish_id: String,
    pub upload_url: String,
    pub video_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub content_type: String,
}

impl TikTokUploadSession {
    pub fn plan(&self) -> ChunkPlan {
        ChunkPlan {
            video_size: self.video_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("nothing to upload: the video is empty")]
    Empty,

    #[error("chunk {index} upload failed: {source}")]
    Transport { index: u64, source: HttpError },

    #[error("chunk {index} rejected with {status}: {body}")]
    Rejected {
        index: u64,
        status: reqwest::StatusCode,
        body: String,
    },
}

/// PUT every chunk of `video` to the session's upload URL, in order
pub async fn upload_chunks(
    http: &HttpClient,
    session: &TikTokUploadSession,
    video: &Bytes,
) -> Result<(), UploadError> {
    let plan = session.plan();
    if plan.is_empty() || video.is_empty() {
        return Err(UploadError::Empty);
    }
    let timeout = http.media_timeout();

    for (index, (start, end)) in plan.ranges().enumerate() {
        let index = index as u64;
        let chunk = video.slice(start as usize..=end as usize);
        let range = format!("bytes {}-{}/{}", start, end, session.video_size);

        debug!(
            publish_id = %session.publish_id,
            chunk = index + 1,
            total = plan.total_chunks,
            %range,
            "Uploading TikTok chunk"
        );

        let response = http
            .request(Method::PUT, &session.upload_url, |req| {
                req.header(CONTENT_TYPE, session.content_type.as_str())
                    .header(CONTENT_RANGE, range.as_str())
                    .timeout(timeout)
                    .body(chunk.clone())
            })
            .await
            .map_err(|source| UploadError::Transport { index, source })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(UploadError::Rejected {
                index,
                status,
                body: body_preview(response).await,
            });
        }
    }

    Ok(())
}
