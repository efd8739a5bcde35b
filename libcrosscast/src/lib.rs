//! Crosscast - publishing dispatch and token lifecycle engine
//!
//! This library publishes one piece of content to Instagram, Facebook,
//! YouTube and TikTok, keeps each platform credential valid, and reconciles a
//! queue of scheduled posts with bounded retries.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod platforms;
pub mod poster;
pub mod rate_limiter;
pub mod reconciler;
pub mod scheduling;
pub mod store;
pub mod tokens;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialPatch, CredentialRecord};
pub use db::Database;
pub use error::{CrosscastError, Result};
pub use poster::PublishDispatcher;
pub use reconciler::{ReconcileSummary, Reconciler};
pub use store::{CredentialStore, MemoryStore, ScheduledPostStore};
pub use types::{
    DispatchOutcome, DispatchRequest, FailReason, Platform, PostStatus, PublishResult,
    ScheduledPost,
};
