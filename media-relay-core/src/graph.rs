//! Instagram Graph API client.
//!
//! Implements [`MediaSource`] on top of `reqwest`. Each request is retried with
//! backoff while the API reports itself unavailable; rejections surface
//! immediately.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::GraphConfig;
use crate::contract::{ChildMedia, FileRef, MediaId, MediaKind, MediaSource, RemoteMediaItem};
use crate::error::{redact_url, ClientError};
use crate::retry::{self, RetryConfig};

const MEDIA_FIELDS: &str =
    "id,media_type,media_url,permalink,caption,timestamp,children{id,media_type,media_url}";
const CHILD_FIELDS: &str = "id,media_type,media_url";

/// Client for the subset of the Graph API the relay reads from.
#[derive(Debug, Clone)]
pub struct GraphApiClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphMedia {
    id: String,
    media_type: String,
    media_url: Option<String>,
    permalink: Option<String>,
    caption: Option<String>,
    timestamp: String,
    children: Option<Page<GraphChild>>,
}

#[derive(Debug, Deserialize)]
struct GraphChild {
    id: String,
    media_type: String,
    media_url: Option<String>,
}

impl GraphApiClient {
    pub fn new(config: &GraphConfig, retry: RetryConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::from_transport("graph", e))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            retry,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let endpoint = redact_url(url);
        retry::retry_with_backoff(&self.retry, retry::classify_client_error, || async {
            let response = self
                .http
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| ClientError::from_transport(endpoint.as_str(), e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::from_status(endpoint.as_str(), status.as_u16(), body));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::from_transport(endpoint.as_str(), e))
        })
        .await
    }
}

#[async_trait]
impl MediaSource for GraphApiClient {
    async fn list_media(
        &self,
        token: &str,
        remote_account_id: &str,
    ) -> Result<Vec<MediaId>, ClientError> {
        let first = format!("{}/{}/media", self.base_url, remote_account_id);
        let limit = self.page_size.to_string();
        let mut page: Page<MediaRef> = self
            .get_json(
                &first,
                &[("fields", "id"), ("limit", &limit), ("access_token", token)],
            )
            .await?;

        let mut ids: Vec<MediaId> = Vec::new();
        loop {
            ids.extend(page.data.into_iter().map(|m| m.id));
            // `next` already carries every query parameter, token included.
            match page.paging.and_then(|p| p.next) {
                Some(next) => page = self.get_json(&next, &[]).await?,
                None => break,
            }
        }

        tracing::info!(remote_account_id, count = ids.len(), "[GRAPH] Listed media");
        Ok(ids)
    }

    async fn get_media_detail(
        &self,
        token: &str,
        media_id: &str,
    ) -> Result<RemoteMediaItem, ClientError> {
        let url = format!("{}/{}", self.base_url, media_id);
        let raw: GraphMedia = self
            .get_json(&url, &[("fields", MEDIA_FIELDS), ("access_token", token)])
            .await?;
        let item = into_item(raw, &url)?;
        tracing::debug!(media_id, kind = item.kind.as_str(), "[GRAPH] Fetched media detail");
        Ok(item)
    }

    async fn resolve_file_refs(
        &self,
        token: &str,
        item: &RemoteMediaItem,
    ) -> Result<Vec<FileRef>, ClientError> {
        match item.kind {
            MediaKind::Image | MediaKind::Video => {
                let url = item.media_url.clone().ok_or_else(|| ClientError::Decode {
                    endpoint: format!("{}/{}", self.base_url, item.id),
                    reason: format!("media {} has no media_url", item.id),
                })?;
                Ok(vec![FileRef {
                    media_id: item.id.clone(),
                    kind: item.kind,
                    url,
                }])
            }
            MediaKind::CarouselAlbum => {
                let children = if item.children.is_empty() {
                    let url = format!("{}/{}/children", self.base_url, item.id);
                    let page: Page<GraphChild> = self
                        .get_json(&url, &[("fields", CHILD_FIELDS), ("access_token", token)])
                        .await?;
                    page.data
                        .into_iter()
                        .map(|c| into_child(c, &url))
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    item.children.clone()
                };

                children
                    .into_iter()
                    .map(|child| {
                        let url = child.media_url.ok_or_else(|| ClientError::Decode {
                            endpoint: format!("{}/{}", self.base_url, child.id),
                            reason: format!("carousel child {} has no media_url", child.id),
                        })?;
                        Ok(FileRef {
                            media_id: child.id,
                            kind: child.kind,
                            url,
                        })
                    })
                    .collect()
            }
        }
    }
}

fn parse_kind(raw: &str, endpoint: &str) -> Result<MediaKind, ClientError> {
    MediaKind::parse(raw).ok_or_else(|| ClientError::Decode {
        endpoint: endpoint.to_string(),
        reason: format!("unknown media_type {raw}"),
    })
}

/// Graph timestamps look like `2024-03-01T12:00:00+0000`.
pub fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn into_child(raw: GraphChild, endpoint: &str) -> Result<ChildMedia, ClientError> {
    Ok(ChildMedia {
        kind: parse_kind(&raw.media_type, endpoint)?,
        id: raw.id,
        media_url: raw.media_url,
    })
}

fn into_item(raw: GraphMedia, endpoint: &str) -> Result<RemoteMediaItem, ClientError> {
    let timestamp = parse_graph_timestamp(&raw.timestamp).ok_or_else(|| ClientError::Decode {
        endpoint: endpoint.to_string(),
        reason: format!("unparseable timestamp {}", raw.timestamp),
    })?;
    let children = raw
        .children
        .map(|page| page.data)
        .unwrap_or_default()
        .into_iter()
        .map(|c| into_child(c, endpoint))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RemoteMediaItem {
        kind: parse_kind(&raw.media_type, endpoint)?,
        id: raw.id,
        caption: raw.caption,
        media_url: raw.media_url,
        permalink: raw.permalink,
        timestamp,
        children,
    })
}
