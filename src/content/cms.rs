//! Bitable (Feishu) client backing `ContentSource` in production.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::config::CmsConfig;
use crate::content::{ContentItem, ContentSource, ContentStatus};
use crate::error::AppError;

/// Refresh the tenant token this long before the API says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct BitableClient {
    http: reqwest::Client,
    config: CmsConfig,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    code: i64,
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

impl BitableClient {
    pub fn new(config: CmsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            config,
            token: RwLock::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        {
            let cached = self.token.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!(
            "{}/auth/v3/tenant_access_token/internal",
            self.config.api_base
        );
        let resp: TokenResponse = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await?
            .json()
            .await?;

        if resp.code != 0 {
            error!(code = resp.code, msg = %resp.msg, "CMS token request rejected");
            return Err(AppError::UpstreamFailure(format!(
                "CMS auth error: {}",
                resp.msg
            )));
        }

        let token = resp
            .tenant_access_token
            .ok_or_else(|| AppError::UpstreamFailure("CMS auth response missing token".into()))?;
        let ttl = Duration::from_secs(resp.expire.unwrap_or(7200))
            .saturating_sub(TOKEN_REFRESH_MARGIN);

        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });

        Ok(token)
    }

    fn records_url(&self) -> String {
        format!(
            "{}/bitable/v1/apps/{}/tables/{}/records",
            self.config.api_base, self.config.base_id, self.config.table_id
        )
    }

    fn parse_record(record: &Value) -> Option<ContentItem> {
        let id = record.get("record_id")?.as_str()?.to_string();
        let fields = record.get("fields")?;

        let status = match field_text(fields, "status").as_deref() {
            Some("published") => ContentStatus::Published,
            _ => ContentStatus::Draft,
        };

        Some(ContentItem {
            id,
            title: field_text(fields, "title").unwrap_or_default(),
            guest: field_text(fields, "guest").unwrap_or_default(),
            source: field_text(fields, "source").unwrap_or_default(),
            tags: fields
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            body: field_text(fields, "content").unwrap_or_default(),
            original_link: field_text(fields, "original_link"),
            status,
            published_at: fields
                .get("published_at")
                .and_then(|v| v.as_i64())
                .and_then(parse_millis),
        })
    }
}

fn field_text(fields: &Value, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        // Rich-text fields arrive as arrays of { text } segments.
        Value::Array(segments) => {
            let joined: String = segments
                .iter()
                .filter_map(|seg| seg.get("text").and_then(|t| t.as_str()))
                .collect();
            Some(joined)
        }
        _ => None,
    }
}

fn parse_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[async_trait]
impl ContentSource for BitableClient {
    async fn fetch(&self, content_id: &str) -> Result<Option<ContentItem>, AppError> {
        let token = self.access_token().await?;
        let url = format!("{}/{}", self.records_url(), content_id);

        let resp = self.http.get(&url).bearer_auth(&token).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: RecordResponse = resp.json().await?;
        if body.code != 0 {
            // The bitable API reports a missing record through its own code,
            // not the HTTP status.
            if body.code == 1254043 {
                return Ok(None);
            }
            warn!(code = body.code, msg = %body.msg, content_id, "CMS record fetch failed");
            return Err(AppError::UpstreamFailure(format!(
                "CMS error: {}",
                body.msg
            )));
        }

        let record = body
            .data
            .as_ref()
            .and_then(|d| d.get("record"))
            .and_then(Self::parse_record);

        Ok(record)
    }

    async fn list_published(&self) -> Result<Vec<ContentItem>, AppError> {
        let token = self.access_token().await?;
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .http
                .get(self.records_url())
                .bearer_auth(&token)
                .query(&[("page_size", "100")]);
            if let Some(ref pt) = page_token {
                req = req.query(&[("page_token", pt.as_str())]);
            }

            let body: RecordResponse = req.send().await?.json().await?;
            if body.code != 0 {
                return Err(AppError::UpstreamFailure(format!(
                    "CMS error: {}",
                    body.msg
                )));
            }

            let data = body.data.unwrap_or(Value::Null);
            if let Some(records) = data.get("items").and_then(|v| v.as_array()) {
                items.extend(
                    records
                        .iter()
                        .filter_map(Self::parse_record)
                        .filter(ContentItem::is_published),
                );
            }

            let has_more = data
                .get("has_more")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !has_more {
                break;
            }
            page_token = data
                .get("page_token")
                .and_then(|v| v.as_str())
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        Ok(items)
    }
}
