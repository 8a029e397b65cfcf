//! Content items and the headless-CMS boundary.
//!
//! Content is owned by the external CMS; this service only reads it.

pub mod cms;

pub use cms::BitableClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub guest: String,
    pub source: String,
    pub tags: Vec<String>,
    /// Full Markdown body.
    pub body: String,
    pub original_link: Option<String>,
    pub status: ContentStatus,
    pub published_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn is_published(&self) -> bool {
        self.status == ContentStatus::Published
    }
}

/// Read-only CMS collaborator. Not-found is surfaced as `Ok(None)`;
/// transport/API failures as `UpstreamFailure`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, content_id: &str) -> Result<Option<ContentItem>, AppError>;
    async fn list_published(&self) -> Result<Vec<ContentItem>, AppError>;
}
